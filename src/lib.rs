// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

//! Real-time trip tracking against a journey-planner GraphQL relay.

pub mod classifier;
pub mod config;
pub mod error;
pub mod gateway;
pub mod graphql;
pub mod itinerary;
pub mod markers;
pub mod model;
pub mod normalizer;
pub mod polling;
pub mod settings;
pub mod tracker;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use error::{Result, TrackerError};

pub fn duration_since_unix_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Current time in epoch seconds, the unit of every stop time.
pub fn unix_now() -> i64 {
    duration_since_unix_epoch().as_secs() as i64
}
