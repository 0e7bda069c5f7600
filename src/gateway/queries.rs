// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! GraphQL documents sent to the journey planner through the relay.

use crate::graphql::GraphQlRequest;
use crate::model::TransportMode;
use serde_json::{Map, Value, json};

/// Alias prefix for batched trip lookups: `trip_0`, `trip_1`, ...
pub const TRIP_ALIAS_PREFIX: &str = "trip_";

const ROUTE_FIELDS: &str = "route { gtfsId shortName longName mode color }";

const VEHICLE_FIELDS: &str = "vehicleId label lat lon heading speed lastUpdated \
     stopRelationship { status stop { gtfsId } } \
     trip { gtfsId route { gtfsId shortName longName mode color } tripGeometry { points } }";

const STOPTIME_FIELDS: &str = "stop { gtfsId name lat lon } \
     scheduledArrival realtimeArrival arrivalDelay \
     scheduledDeparture realtimeDeparture departureDelay \
     realtime serviceDay";

const ALERT_FIELDS: &str = "id alertHeaderText alertDescriptionText alertSeverityLevel \
     effectiveStartDate effectiveEndDate";

pub const PLAN_QUERY: &str = r#"query Plan($fromLat: Float!, $fromLon: Float!, $toLat: Float!, $toLon: Float!, $date: String, $time: String, $numItineraries: Int) {
  plan(
    from: { lat: $fromLat, lon: $fromLon }
    to: { lat: $toLat, lon: $toLon }
    date: $date
    time: $time
    numItineraries: $numItineraries
  ) {
    itineraries {
      startTime
      endTime
      duration
      legs {
        mode
        startTime
        endTime
        from { name stop { gtfsId } }
        to { name stop { gtfsId } }
        route { gtfsId shortName longName mode color }
        trip { gtfsId }
        serviceDate
      }
    }
  }
}"#;

pub const VEHICLE_POSITIONS_QUERY: &str = r#"query VehiclePositions($minLat: Float!, $minLon: Float!, $maxLat: Float!, $maxLon: Float!, $modes: [Mode]) {
  vehiclePositions(minLat: $minLat, minLon: $minLon, maxLat: $maxLat, maxLon: $maxLon, modes: $modes) {
    vehicleId label lat lon heading speed lastUpdated
    stopRelationship { status stop { gtfsId } }
    trip { gtfsId route { gtfsId shortName longName mode color } tripGeometry { points } }
  }
}"#;

pub const TRIP_PREVIEW_QUERY: &str = r#"query TripPreview($id: String!, $serviceDate: String!) {
  trip(id: $id) {
    gtfsId
    route { gtfsId shortName longName mode color }
    stoptimesForDate(serviceDate: $serviceDate) {
      stop { gtfsId name lat lon }
      scheduledArrival realtimeArrival arrivalDelay
      scheduledDeparture realtimeDeparture departureDelay
      realtime serviceDay
    }
  }
}"#;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TripKey {
    pub gtfs_id: String,
    /// `YYYYMMDD`
    pub service_date: String,
}

impl TripKey {
    pub fn new(gtfs_id: impl Into<String>, service_date: impl Into<String>) -> Self {
        TripKey {
            gtfs_id: gtfs_id.into(),
            service_date: service_date.into(),
        }
    }
}

pub fn trip_alias(index: usize) -> String {
    format!("{}{}", TRIP_ALIAS_PREFIX, index)
}

/// Full trip payloads (stop times, vehicle, alerts), one aliased field per key.
pub fn trips_query(keys: &[TripKey]) -> GraphQlRequest {
    let mut params = Vec::with_capacity(keys.len());
    let mut fields = Vec::with_capacity(keys.len());
    let mut variables = Map::new();

    for (i, key) in keys.iter().enumerate() {
        params.push(format!("$id{i}: String!, $date{i}: String!"));
        fields.push(format!(
            "{alias}: trip(id: $id{i}) {{ gtfsId {route} \
             stoptimesForDate(serviceDate: $date{i}) {{ {stoptimes} }} \
             tripGeometry {{ points }} \
             pattern {{ vehiclePositions {{ {vehicle} }} }} \
             alerts {{ {alerts} }} }}",
            alias = trip_alias(i),
            route = ROUTE_FIELDS,
            stoptimes = STOPTIME_FIELDS,
            vehicle = VEHICLE_FIELDS,
            alerts = ALERT_FIELDS,
        ));
        variables.insert(format!("id{i}"), Value::String(key.gtfs_id.clone()));
        variables.insert(format!("date{i}"), Value::String(key.service_date.clone()));
    }

    GraphQlRequest::new(
        format!("query Trips({}) {{ {} }}", params.join(", "), fields.join(" ")),
        Value::Object(variables),
    )
}

/// Live vehicles only, for the single-trip marker layer.
pub fn vehicle_positions_for_trips_query(keys: &[TripKey]) -> GraphQlRequest {
    let mut params = Vec::with_capacity(keys.len());
    let mut fields = Vec::with_capacity(keys.len());
    let mut variables = Map::new();

    for (i, key) in keys.iter().enumerate() {
        params.push(format!("$id{i}: String!"));
        fields.push(format!(
            "{alias}: trip(id: $id{i}) {{ gtfsId {route} tripGeometry {{ points }} \
             pattern {{ vehiclePositions {{ {vehicle} }} }} }}",
            alias = trip_alias(i),
            route = ROUTE_FIELDS,
            vehicle = VEHICLE_FIELDS,
        ));
        variables.insert(format!("id{i}"), Value::String(key.gtfs_id.clone()));
    }

    GraphQlRequest::new(
        format!(
            "query VehiclePositionsForTrips({}) {{ {} }}",
            params.join(", "),
            fields.join(" ")
        ),
        Value::Object(variables),
    )
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

pub fn vehicle_positions_query(bounds: &BoundingBox, modes: &[TransportMode]) -> GraphQlRequest {
    let modes = modes
        .iter()
        .map(|mode| Value::String(mode.as_graphql().to_string()))
        .collect::<Vec<_>>();

    GraphQlRequest::new(
        VEHICLE_POSITIONS_QUERY,
        json!({
            "minLat": bounds.min_lat,
            "minLon": bounds.min_lon,
            "maxLat": bounds.max_lat,
            "maxLon": bounds.max_lon,
            "modes": modes,
        }),
    )
}

pub fn trip_preview_query(key: &TripKey) -> GraphQlRequest {
    GraphQlRequest::new(
        TRIP_PREVIEW_QUERY,
        json!({ "id": key.gtfs_id, "serviceDate": key.service_date }),
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanParams {
    pub from: (f64, f64),
    pub to: (f64, f64),
    pub date: Option<String>,
    pub time: Option<String>,
    pub num_itineraries: u32,
}

pub fn plan_query(params: &PlanParams) -> GraphQlRequest {
    GraphQlRequest::new(
        PLAN_QUERY,
        json!({
            "fromLat": params.from.0,
            "fromLon": params.from.1,
            "toLat": params.to.0,
            "toLon": params.to.1,
            "date": params.date,
            "time": params.time,
            "numItineraries": params.num_itineraries,
        }),
    )
}
