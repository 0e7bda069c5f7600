// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Selected itineraries as handed to the tracker.

use crate::gateway::queries::TripKey;
use crate::model::{route_label, TransportMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One leg of an itinerary. Walking legs carry no stop ids and no trip.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sequence {
    pub mode: TransportMode,
    pub from_stop_id: Option<String>,
    pub to_stop_id: Option<String>,
    pub from_name: Option<String>,
    pub to_name: Option<String>,
    pub trip_id: Option<String>,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_color: Option<String>,
    /// epoch seconds
    pub start_time: i64,
    pub end_time: i64,
    /// `YYYYMMDD`
    pub service_date: Option<String>,
}

impl Sequence {
    pub fn is_transit(&self) -> bool {
        self.trip_id.is_some()
    }

    pub fn label(&self) -> Option<String> {
        route_label(
            self.mode,
            self.route_short_name.as_deref(),
            self.route_long_name.as_deref(),
        )
    }

    /// Key for trip queries. Falls back to the UTC date of the leg start when the
    /// planner omitted the service date.
    pub fn trip_key(&self) -> Option<TripKey> {
        let trip_id = self.trip_id.as_ref()?;
        let service_date = match &self.service_date {
            Some(date) => date.replace('-', ""),
            None => service_date(self.start_time)?,
        };
        Some(TripKey::new(trip_id.clone(), service_date))
    }
}

/// `YYYYMMDD` of the UTC day containing `epoch_secs`.
pub fn service_date(epoch_secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0).map(|date| date.format("%Y%m%d").to_string())
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackedRoute {
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub legs: Vec<Sequence>,
}

impl TrackedRoute {
    pub fn transit_legs(&self) -> impl Iterator<Item = &Sequence> {
        self.legs.iter().filter(|leg| leg.is_transit())
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawPlace {
    name: Option<String>,
    stop: Option<RawPlaceStop>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawPlaceStop {
    gtfs_id: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawLegRoute {
    short_name: Option<String>,
    long_name: Option<String>,
    color: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawLegTrip {
    gtfs_id: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawLeg {
    mode: Option<TransportMode>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    from: Option<RawPlace>,
    to: Option<RawPlace>,
    route: Option<RawLegRoute>,
    trip: Option<RawLegTrip>,
    service_date: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawItinerary {
    start_time: Option<i64>,
    end_time: Option<i64>,
    duration: Option<i64>,
    #[serde(default)]
    legs: Vec<Option<RawLeg>>,
}

fn place_stop_id(place: Option<&RawPlace>) -> Option<String> {
    place?.stop.as_ref()?.gtfs_id.clone()
}

fn millis_to_secs(ms: Option<i64>) -> i64 {
    ms.unwrap_or(0) / 1000
}

impl From<RawLeg> for Sequence {
    fn from(raw: RawLeg) -> Self {
        Sequence {
            mode: raw.mode.unwrap_or(TransportMode::Other),
            from_stop_id: place_stop_id(raw.from.as_ref()),
            to_stop_id: place_stop_id(raw.to.as_ref()),
            from_name: raw.from.and_then(|place| place.name),
            to_name: raw.to.and_then(|place| place.name),
            trip_id: raw.trip.and_then(|trip| trip.gtfs_id),
            route_short_name: raw.route.as_ref().and_then(|r| r.short_name.clone()),
            route_long_name: raw.route.as_ref().and_then(|r| r.long_name.clone()),
            route_color: raw.route.and_then(|r| r.color),
            start_time: millis_to_secs(raw.start_time),
            end_time: millis_to_secs(raw.end_time),
            service_date: raw.service_date,
        }
    }
}

/// Itineraries under `plan.itineraries` of a Plan response. Null itineraries and
/// legs (partial failures) are dropped.
pub fn parse_plan(data: &Value) -> Vec<TrackedRoute> {
    let Some(itineraries) = data
        .get("plan")
        .and_then(|plan| plan.get("itineraries"))
        .and_then(|itineraries| itineraries.as_array())
    else {
        return vec![];
    };

    itineraries
        .iter()
        .filter(|value| !value.is_null())
        .filter_map(|value| match RawItinerary::deserialize(value) {
            Ok(itinerary) => Some(itinerary),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed itinerary");
                None
            }
        })
        .map(|itinerary| TrackedRoute {
            start_time: millis_to_secs(itinerary.start_time),
            end_time: millis_to_secs(itinerary.end_time),
            duration: itinerary.duration.unwrap_or(0),
            legs: itinerary
                .legs
                .into_iter()
                .flatten()
                .map(Sequence::from)
                .collect(),
        })
        .collect()
}
