// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Turns raw journey-planner trip payloads into `TripSnapshot`s.
//!
//! Nothing here fails on odd upstream data. Missing pieces become `None`, empty
//! vectors or are skipped with a debug log.

use crate::gateway::queries::TRIP_ALIAS_PREFIX;
use crate::model::{
    route_label, Alert, DelayStatus, StopRecord, TransportMode, TripSnapshot, VehiclePosition,
};
use geo::{Coord, LineString, Point};
use serde::Deserialize;
use serde_json::Value;

const POLYLINE_PRECISION: u32 = 5;

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawRoute {
    pub gtfs_id: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub mode: Option<TransportMode>,
    pub color: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawStop {
    pub gtfs_id: String,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawStoptime {
    pub stop: Option<RawStop>,
    pub scheduled_arrival: Option<i64>,
    pub realtime_arrival: Option<i64>,
    pub arrival_delay: Option<i64>,
    pub scheduled_departure: Option<i64>,
    pub realtime_departure: Option<i64>,
    pub departure_delay: Option<i64>,
    #[serde(default)]
    pub realtime: Option<bool>,
    pub service_day: Option<i64>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RawGeometry {
    pub points: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawStopRef {
    pub gtfs_id: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RawStopRelationship {
    pub status: Option<String>,
    pub stop: Option<RawStopRef>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawVehicleTrip {
    pub gtfs_id: Option<String>,
    pub route: Option<RawRoute>,
    pub trip_geometry: Option<RawGeometry>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawVehicle {
    pub vehicle_id: Option<String>,
    pub label: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub last_updated: Option<i64>,
    pub stop_relationship: Option<RawStopRelationship>,
    pub trip: Option<RawVehicleTrip>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawPattern {
    pub vehicle_positions: Option<Vec<RawVehicle>>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawAlert {
    pub id: Option<String>,
    pub alert_header_text: Option<String>,
    pub alert_description_text: Option<String>,
    pub alert_severity_level: Option<String>,
    pub effective_start_date: Option<i64>,
    pub effective_end_date: Option<i64>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RawTrip {
    pub gtfs_id: String,
    pub route: Option<RawRoute>,
    pub stoptimes_for_date: Option<Vec<RawStoptime>>,
    pub trip_geometry: Option<RawGeometry>,
    pub pattern: Option<RawPattern>,
    pub alerts: Option<Vec<RawAlert>>,
}

impl RawTrip {
    fn vehicles(&self) -> &[RawVehicle] {
        self.pattern
            .as_ref()
            .and_then(|pattern| pattern.vehicle_positions.as_deref())
            .unwrap_or(&[])
    }
}

/// Reads the trip object stored under `key` in a GraphQL `data` value. Null or
/// malformed trips yield `None`.
pub fn raw_trip_at(data: &Value, key: &str) -> Option<RawTrip> {
    let value = data.get(key)?;
    if value.is_null() {
        tracing::debug!(key, "Trip missing from response");
        return None;
    }

    match RawTrip::deserialize(value) {
        Ok(trip) => Some(trip),
        Err(err) => {
            tracing::debug!(key, error = %err, "Skipping malformed trip payload");
            None
        }
    }
}

pub fn normalize(raw: &RawTrip, delay_threshold_secs: i64) -> TripSnapshot {
    let stops = raw
        .stoptimes_for_date
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter_map(|stoptime| normalize_stoptime(stoptime, delay_threshold_secs))
        .collect::<Vec<_>>();

    let vehicle = trip_vehicle(raw);

    let alerts = raw
        .alerts
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(|alert| Alert {
            id: alert.id.clone(),
            header: alert.alert_header_text.clone(),
            description: alert.alert_description_text.clone(),
            severity: alert.alert_severity_level.clone(),
            effective_start: alert.effective_start_date,
            effective_end: alert.effective_end_date,
        })
        .collect();

    TripSnapshot {
        gtfs_id: raw.gtfs_id.clone(),
        stops,
        vehicle,
        alerts,
        is_finished: false,
    }
}

/// Vehicle from a free-roam or per-trip vehicle feed. `fallback_route` is used when
/// the vehicle's own trip carries no route.
pub fn normalize_vehicle(
    raw: &RawVehicle,
    fallback_route: Option<&RawRoute>,
) -> Option<VehiclePosition> {
    build_vehicle(raw, fallback_route, None)
}

/// Live vehicle of a trip, matched the same way `normalize` matches it.
pub fn trip_vehicle(raw: &RawTrip) -> Option<VehiclePosition> {
    let trip_points = raw
        .trip_geometry
        .as_ref()
        .and_then(|geometry| geometry.points.as_deref());
    matching_vehicle(raw).and_then(|vehicle| build_vehicle(vehicle, raw.route.as_ref(), trip_points))
}

/// Trips under every `trip_N` alias of a batched response, ordered by N. Null and
/// malformed aliases are skipped.
pub fn batch_trips(data: &Value) -> Vec<(String, RawTrip)> {
    let Some(object) = data.as_object() else {
        return vec![];
    };

    let mut aliases = object
        .keys()
        .filter_map(|key| {
            key.strip_prefix(TRIP_ALIAS_PREFIX)
                .and_then(|index| index.parse::<usize>().ok())
                .map(|index| (index, key.as_str()))
        })
        .collect::<Vec<_>>();
    aliases.sort_unstable();

    aliases
        .into_iter()
        .filter_map(|(_, alias)| raw_trip_at(data, alias).map(|raw| (alias.to_string(), raw)))
        .collect()
}

/// Normalizes every `trip_N` alias in a batched response, ordered by N.
pub fn normalize_batch(data: &Value, delay_threshold_secs: i64) -> Vec<(String, TripSnapshot)> {
    batch_trips(data)
        .into_iter()
        .map(|(alias, raw)| {
            let snapshot = normalize(&raw, delay_threshold_secs);
            (alias, snapshot)
        })
        .collect()
}

fn normalize_stoptime(raw: &RawStoptime, delay_threshold_secs: i64) -> Option<StopRecord> {
    let Some(stop) = raw.stop.as_ref() else {
        tracing::debug!("Skipping stop time without a stop");
        return None;
    };

    let service_day = raw.service_day.unwrap_or(0);
    let scheduled_arrival = raw.scheduled_arrival.or(raw.scheduled_departure).unwrap_or(0);
    let scheduled_departure = raw.scheduled_departure.unwrap_or(scheduled_arrival);
    let realtime_arrival = raw.realtime_arrival.unwrap_or(scheduled_arrival);
    let realtime_departure = raw.realtime_departure.unwrap_or(scheduled_departure);

    let delay = match (raw.realtime_departure, raw.departure_delay) {
        (Some(_), _) => realtime_departure - scheduled_departure,
        (None, Some(delay)) => delay,
        (None, None) => 0,
    };

    Some(StopRecord {
        gtfs_id: stop.gtfs_id.clone(),
        name: stop.name.clone().unwrap_or_default(),
        geometry: Point::new(stop.lon, stop.lat),
        scheduled_arrival: service_day + scheduled_arrival,
        realtime_arrival: service_day + realtime_arrival,
        scheduled_departure: service_day + scheduled_departure,
        realtime_departure: service_day + realtime_departure,
        realtime: raw.realtime.unwrap_or(false),
        delay,
        status: DelayStatus::classify(delay, delay_threshold_secs),
        is_passed: false,
        is_arrived: false,
    })
}

fn matching_vehicle(raw: &RawTrip) -> Option<&RawVehicle> {
    let vehicles = raw.vehicles();

    let by_trip = vehicles.iter().find(|vehicle| {
        vehicle
            .trip
            .as_ref()
            .and_then(|trip| trip.gtfs_id.as_deref())
            == Some(raw.gtfs_id.as_str())
    });

    by_trip.or_else(|| match vehicles {
        [only] if only.trip.as_ref().and_then(|t| t.gtfs_id.as_ref()).is_none() => Some(only),
        _ => None,
    })
}

fn build_vehicle(
    raw: &RawVehicle,
    fallback_route: Option<&RawRoute>,
    fallback_points: Option<&str>,
) -> Option<VehiclePosition> {
    let (Some(vehicle_id), Some(lat), Some(lon)) = (raw.vehicle_id.as_ref(), raw.lat, raw.lon)
    else {
        tracing::debug!(vehicle_id = ?raw.vehicle_id, "Skipping vehicle without id or position");
        return None;
    };

    let trip = raw.trip.as_ref();
    let route = trip.and_then(|trip| trip.route.as_ref()).or(fallback_route);
    let mode = route
        .and_then(|route| route.mode)
        .unwrap_or(TransportMode::Other);

    let label = route
        .and_then(|route| route_label(mode, route.short_name.as_deref(), route.long_name.as_deref()))
        .or_else(|| raw.label.clone())
        .unwrap_or_default();

    let color = route
        .and_then(|route| route.color.as_deref())
        .filter(|color| !color.is_empty())
        .map(|color| match color.starts_with('#') {
            true => color.to_string(),
            false => format!("#{}", color),
        })
        .unwrap_or_else(|| mode.color().to_string());

    let points = trip
        .and_then(|trip| trip.trip_geometry.as_ref())
        .and_then(|geometry| geometry.points.as_deref())
        .or(fallback_points);

    Some(VehiclePosition {
        vehicle_id: vehicle_id.clone(),
        coordinates: Coord { x: lon, y: lat },
        heading: raw.heading,
        speed: raw.speed,
        mode,
        trip_id: trip.and_then(|trip| trip.gtfs_id.clone()),
        label,
        current_stop_id: raw
            .stop_relationship
            .as_ref()
            .and_then(|relationship| relationship.stop.as_ref())
            .and_then(|stop| stop.gtfs_id.clone()),
        color,
        trail: points.map(decode_trail).unwrap_or_else(|| LineString::new(vec![])),
    })
}

fn decode_trail(points: &str) -> LineString<f64> {
    match polyline::decode_polyline(points, POLYLINE_PRECISION) {
        Ok(line) => line,
        Err(err) => {
            tracing::debug!(error = %err, "Undecodable trip polyline, using empty trail");
            LineString::new(vec![])
        }
    }
}
