// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Vehicle markers on a map layer, their motion and the trip preview overlay.

pub mod feed;
pub mod preview;
pub mod registry;

use crate::model::{StopRecord, VehiclePosition};
use geo::{Coord, LineString};

pub use preview::{stop_window, TripPreviewLoader, TripStopCache};
pub use registry::{LayerContext, MarkerEntry, MarkerRegistry, PreviewChange};

/// The map surface markers are drawn on.
pub trait DrawingLayer {
    type Handle;

    fn add_marker(&mut self, vehicle: &VehiclePosition) -> Self::Handle;

    fn move_marker(&mut self, handle: &Self::Handle, coordinates: Coord<f64>);

    /// Heading, label and colour.
    fn style_marker(&mut self, handle: &Self::Handle, vehicle: &VehiclePosition);

    fn remove_marker(&mut self, handle: Self::Handle);

    fn draw_preview(&mut self, trip_id: &str, line: &LineString<f64>, stops: &[StopRecord], color: &str);

    fn clear_preview(&mut self, trip_id: &str);
}

/// Writes every drawing call to the log. Used by the command line client.
#[derive(Default)]
pub struct TracingLayer {
    next_handle: u64,
}

impl DrawingLayer for TracingLayer {
    type Handle = (u64, String);

    fn add_marker(&mut self, vehicle: &VehiclePosition) -> Self::Handle {
        let handle = self.next_handle;
        self.next_handle += 1;
        tracing::info!(
            vehicle = %vehicle.vehicle_id,
            label = %vehicle.label,
            lon = vehicle.coordinates.x,
            lat = vehicle.coordinates.y,
            "Marker added"
        );
        (handle, vehicle.vehicle_id.clone())
    }

    fn move_marker(&mut self, handle: &Self::Handle, coordinates: Coord<f64>) {
        tracing::debug!(vehicle = %handle.1, lon = coordinates.x, lat = coordinates.y, "Marker moved");
    }

    fn style_marker(&mut self, handle: &Self::Handle, vehicle: &VehiclePosition) {
        tracing::trace!(vehicle = %handle.1, heading = ?vehicle.heading, color = %vehicle.color, "Marker styled");
    }

    fn remove_marker(&mut self, handle: Self::Handle) {
        tracing::info!(vehicle = %handle.1, "Marker removed");
    }

    fn draw_preview(&mut self, trip_id: &str, line: &LineString<f64>, stops: &[StopRecord], color: &str) {
        tracing::info!(trip = trip_id, points = line.0.len(), stops = stops.len(), color, "Preview drawn");
    }

    fn clear_preview(&mut self, trip_id: &str) {
        tracing::info!(trip = trip_id, "Preview cleared");
    }
}
