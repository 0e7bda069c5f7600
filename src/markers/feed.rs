// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Vehicle fetches that feed a marker layer.

use crate::classifier::{ApiContext, ErrorClassifier};
use crate::error::Result;
use crate::gateway::queries::{
    vehicle_positions_for_trips_query, vehicle_positions_query, BoundingBox, TripKey,
};
use crate::gateway::TransitGateway;
use crate::model::{modes_for_zoom, VehiclePosition};
use crate::normalizer::{batch_trips, normalize_vehicle, trip_vehicle, RawVehicle};
use serde::Deserialize;

/// Every vehicle inside `bounds` of the modes visible at `zoom`.
pub async fn fetch_free_roam<G: TransitGateway>(
    gateway: &G,
    classifier: &ErrorClassifier,
    bounds: &BoundingBox,
    zoom: u8,
) -> Result<Vec<VehiclePosition>> {
    let modes = modes_for_zoom(zoom);
    let response = gateway
        .graphql(vehicle_positions_query(bounds, &modes))
        .await?;
    classifier.report(ApiContext::VehiclePositions, &response);

    let vehicles = response
        .data
        .as_ref()
        .and_then(|data| data.get("vehiclePositions"))
        .and_then(|list| list.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|value| RawVehicle::deserialize(value).ok())
                .filter_map(|raw| normalize_vehicle(&raw, None))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    tracing::debug!(zoom, modes = modes.len(), vehicles = vehicles.len(), "Free-roam vehicles");
    Ok(vehicles)
}

/// Live vehicles of the given trips, one request for all of them.
pub async fn fetch_trip_vehicles<G: TransitGateway>(
    gateway: &G,
    classifier: &ErrorClassifier,
    keys: &[TripKey],
) -> Result<Vec<VehiclePosition>> {
    if keys.is_empty() {
        return Ok(vec![]);
    }

    let response = gateway
        .graphql(vehicle_positions_for_trips_query(keys))
        .await?;
    classifier.report(ApiContext::VehiclePositionsForTrips, &response);

    let vehicles = response
        .data
        .as_ref()
        .map(|data| {
            batch_trips(data)
                .iter()
                .filter_map(|(_, raw)| trip_vehicle(raw))
                .collect()
        })
        .unwrap_or_default();

    Ok(vehicles)
}
