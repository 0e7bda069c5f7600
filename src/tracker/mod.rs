// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Stop passage, arrival and completion for one tracked leg.

pub mod session;

use crate::itinerary::Sequence;
use crate::model::{stop_index, TripSnapshot};
use ahash::AHashSet;

pub use session::{TrackingEvent, TrackingSession};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    /// The leg has no trip to follow.
    Idle,
    Active,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LegBounds {
    origin: Option<usize>,
    destination: Option<usize>,
}

#[derive(Debug)]
pub struct TripProgressTracker {
    from_stop_id: Option<String>,
    to_stop_id: Option<String>,
    state: TrackerState,
    passed: AHashSet<String>,
}

impl TripProgressTracker {
    pub fn new(leg: &Sequence) -> Self {
        let state = match leg.trip_id {
            Some(_) => TrackerState::Active,
            None => TrackerState::Idle,
        };

        TripProgressTracker {
            from_stop_id: leg.from_stop_id.clone(),
            to_stop_id: leg.to_stop_id.clone(),
            state,
            passed: AHashSet::new(),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn should_continue(&self) -> bool {
        self.state == TrackerState::Active
    }

    /// Stop lists can arrive partial or empty, so the leg bounds are resolved
    /// against every snapshot.
    fn bounds(&self, snapshot: &TripSnapshot) -> LegBounds {
        let resolve = |id: &Option<String>| {
            id.as_deref()
                .and_then(|id| stop_index(&snapshot.stops, id))
        };

        LegBounds {
            origin: resolve(&self.from_stop_id),
            destination: resolve(&self.to_stop_id),
        }
    }

    /// Applies one snapshot. Returns the snapshot to publish, or `None` when the
    /// tracker is idle or already finished, in which case nothing is touched.
    pub fn observe(&mut self, mut snapshot: TripSnapshot, now: i64) -> Option<TripSnapshot> {
        if self.state != TrackerState::Active {
            return None;
        }

        let current = snapshot
            .vehicle
            .as_ref()
            .and_then(|vehicle| vehicle.current_stop_id.as_deref())
            .and_then(|id| stop_index(&snapshot.stops, id));

        let bounds = self.bounds(&snapshot);

        if let Some(index) = current {
            if Some(index) > bounds.origin {
                self.passed.insert(snapshot.stops[index].gtfs_id.clone());
            }
        }

        // passage never reverts, even if the feed reports an earlier or unknown stop
        for stop in snapshot.stops.iter_mut() {
            stop.is_passed = self.passed.contains(&stop.gtfs_id);
        }

        let destination_arrived = current > bounds.destination;
        if let Some(destination) = bounds.destination {
            if let Some(stop) = snapshot.stops.get_mut(destination) {
                stop.is_arrived = destination_arrived;
            }
        }

        let last_delayed = snapshot
            .final_stop()
            .map(|stop| stop.delay_adjusted_departure());

        match last_delayed {
            Some(last) if last <= now => {
                snapshot.is_finished = true;
                self.state = TrackerState::Finished;
                tracing::info!(trip = %snapshot.gtfs_id, last, now, "Trip finished");
            }
            _ => {
                snapshot.is_finished = false;
                tracing::debug!(
                    trip = %snapshot.gtfs_id,
                    current = ?current,
                    destination_arrived,
                    "Trip progress"
                );
            }
        }

        Some(snapshot)
    }
}
