// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::preview::TripPreviewLoader;
use super::DrawingLayer;
use crate::error::Result;
use crate::gateway::queries::TripKey;
use crate::gateway::TransitGateway;
use crate::itinerary::{service_date, Sequence};
use crate::model::{StopRecord, TransportMode, VehiclePosition};
use ahash::{AHashMap, AHashSet};
use geo::{Coord, LineString};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerContext {
    /// Every vehicle in a bounding box. Vehicles that drop out are removed.
    FreeRoam,
    /// The vehicle of the tracked trip. Markers are never removed.
    SingleTrip,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Animation {
    from: Coord<f64>,
    to: Coord<f64>,
    started: Instant,
}

impl Animation {
    fn fraction(&self, now: Instant, duration: Duration) -> f64 {
        if duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    fn position(&self, now: Instant, duration: Duration) -> Coord<f64> {
        let t = self.fraction(now, duration);
        Coord {
            x: self.from.x + (self.to.x - self.from.x) * t,
            y: self.from.y + (self.to.y - self.from.y) * t,
        }
    }
}

#[derive(Debug)]
pub struct MarkerEntry<H> {
    handle: H,
    displayed: Coord<f64>,
    trip_id: Option<String>,
    mode: TransportMode,
    color: String,
    animations: Vec<Animation>,
}

impl<H> MarkerEntry<H> {
    pub fn displayed(&self) -> Coord<f64> {
        self.displayed
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.trip_id.as_deref()
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn is_animating(&self) -> bool {
        !self.animations.is_empty()
    }
}

#[derive(Debug, PartialEq)]
pub enum PreviewChange {
    /// No marker with that vehicle id, or it has no trip.
    Ignored,
    Cleared { trip_id: String },
    Shown { trip_id: String, stops: Vec<StopRecord> },
}

/// Owns every vehicle marker on one drawing layer.
pub struct MarkerRegistry<L: DrawingLayer> {
    layer: L,
    markers: AHashMap<String, MarkerEntry<L::Handle>>,
    animation_duration: Duration,
    preview: Option<String>,
}

impl<L: DrawingLayer> MarkerRegistry<L> {
    pub fn new(layer: L, animation_duration: Duration) -> Self {
        MarkerRegistry {
            layer,
            markers: AHashMap::new(),
            animation_duration,
            preview: None,
        }
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn get(&self, vehicle_id: &str) -> Option<&MarkerEntry<L::Handle>> {
        self.markers.get(vehicle_id)
    }

    pub fn vehicle_ids(&self) -> AHashSet<&str> {
        self.markers.keys().map(|id| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn preview_trip(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    pub fn update_layer(&mut self, fresh: &[VehiclePosition], context: LayerContext, now: Instant) {
        for vehicle in fresh {
            match self.markers.get_mut(&vehicle.vehicle_id) {
                Some(entry) => {
                    entry.animations.push(Animation {
                        from: entry.displayed,
                        to: vehicle.coordinates,
                        started: now,
                    });
                    entry.trip_id = vehicle.trip_id.clone();
                    entry.mode = vehicle.mode;
                    entry.color = vehicle.color.clone();
                    self.layer.style_marker(&entry.handle, vehicle);
                }
                None => {
                    let handle = self.layer.add_marker(vehicle);
                    self.markers.insert(
                        vehicle.vehicle_id.clone(),
                        MarkerEntry {
                            handle,
                            displayed: vehicle.coordinates,
                            trip_id: vehicle.trip_id.clone(),
                            mode: vehicle.mode,
                            color: vehicle.color.clone(),
                            animations: vec![],
                        },
                    );
                }
            }
        }

        if context == LayerContext::FreeRoam {
            let fresh_ids = fresh
                .iter()
                .map(|vehicle| vehicle.vehicle_id.as_str())
                .collect::<AHashSet<_>>();

            let stale = self
                .markers
                .keys()
                .filter(|id| !fresh_ids.contains(id.as_str()))
                .cloned()
                .collect::<Vec<_>>();

            for vehicle_id in stale {
                if let Some(entry) = self.markers.remove(&vehicle_id) {
                    self.layer.remove_marker(entry.handle);
                }
            }
        }

        tracing::trace!(context = ?context, fresh = fresh.len(), markers = self.markers.len(), "Layer updated");
    }

    /// One animation frame. Overlapping animations for a marker run in start order,
    /// so the most recent one decides where it ends up.
    pub fn advance(&mut self, now: Instant) {
        let duration = self.animation_duration;

        for entry in self.markers.values_mut() {
            if entry.animations.is_empty() {
                continue;
            }

            for animation in &entry.animations {
                entry.displayed = animation.position(now, duration);
            }
            entry
                .animations
                .retain(|animation| animation.fraction(now, duration) < 1.0);

            self.layer.move_marker(&entry.handle, entry.displayed);
        }
    }

    pub fn clear_preview(&mut self) -> Option<String> {
        let trip_id = self.preview.take()?;
        self.layer.clear_preview(&trip_id);
        Some(trip_id)
    }

    /// Handles a click on a vehicle marker. Clicking the previewed trip again hides
    /// it. `leg` bounds the stop window when it is the leg riding that trip.
    pub async fn toggle_preview<G: TransitGateway>(
        &mut self,
        vehicle_id: &str,
        loader: &mut TripPreviewLoader<G>,
        leg: Option<&Sequence>,
        now: i64,
    ) -> Result<PreviewChange> {
        let Some(entry) = self.markers.get(vehicle_id) else {
            return Ok(PreviewChange::Ignored);
        };
        let Some(trip_id) = entry.trip_id.clone() else {
            return Ok(PreviewChange::Ignored);
        };
        let color = entry.color.clone();

        if self.preview.as_deref() == Some(trip_id.as_str()) {
            self.clear_preview();
            return Ok(PreviewChange::Cleared { trip_id });
        }
        self.clear_preview();

        let leg = leg.filter(|leg| leg.trip_id.as_deref() == Some(trip_id.as_str()));
        let key = leg
            .and_then(|leg| leg.trip_key())
            .or_else(|| service_date(now).map(|date| TripKey::new(trip_id.clone(), date)));
        let Some(key) = key else {
            return Ok(PreviewChange::Ignored);
        };

        let bounds = leg.and_then(|leg| {
            Some((leg.from_stop_id.as_deref()?, leg.to_stop_id.as_deref()?))
        });

        let stops = loader.load_window(&key, bounds).await?;
        let line = stops
            .iter()
            .map(|stop| stop.geometry.0)
            .collect::<LineString<f64>>();

        self.layer.draw_preview(&trip_id, &line, &stops, &color);
        self.preview = Some(trip_id.clone());
        tracing::debug!(trip = %trip_id, stops = stops.len(), "Showing trip preview");

        Ok(PreviewChange::Shown { trip_id, stops })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::RecordingNotifier;
    use crate::classifier::ErrorClassifier;
    use crate::gateway::fake::FakeGateway;
    use crate::graphql::GraphQlResponse;
    use crate::itinerary::test_fixtures::leg;
    use crate::markers::testing::{LayerOp, RecordingLayer};
    use crate::model::test_fixtures::vehicle;
    use serde_json::json;
    use std::sync::Arc;

    const ANIMATION: Duration = Duration::from_millis(1000);

    fn registry() -> MarkerRegistry<RecordingLayer> {
        MarkerRegistry::new(RecordingLayer::default(), ANIMATION)
    }

    fn ids(registry: &MarkerRegistry<RecordingLayer>) -> Vec<String> {
        let mut ids = registry
            .vehicle_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    #[test]
    fn test_free_roam_matches_fresh_set() {
        let mut registry = registry();
        let now = Instant::now();

        registry.update_layer(
            &[vehicle("a", "t1", 0.0, 0.0), vehicle("b", "t2", 1.0, 1.0)],
            LayerContext::FreeRoam,
            now,
        );
        registry.update_layer(
            &[vehicle("b", "t2", 1.5, 1.0), vehicle("c", "t3", 2.0, 2.0)],
            LayerContext::FreeRoam,
            now,
        );

        assert_eq!(ids(&registry), vec!["b", "c"]);
        assert_eq!(registry.layer().live_markers(), 2);
        assert!(registry.layer().ops.contains(&LayerOp::Remove(0)));
    }

    #[test]
    fn test_single_trip_never_removes() {
        let mut registry = registry();
        let now = Instant::now();

        registry.update_layer(&[vehicle("a", "t1", 0.0, 0.0)], LayerContext::SingleTrip, now);
        registry.update_layer(&[vehicle("b", "t1", 0.0, 0.0)], LayerContext::SingleTrip, now);
        registry.update_layer(&[], LayerContext::SingleTrip, now);

        assert_eq!(ids(&registry), vec!["a", "b"]);
    }

    #[test]
    fn test_interpolation_is_clamped() {
        let mut registry = registry();
        let start = Instant::now();

        registry.update_layer(&[vehicle("a", "t1", 0.0, 0.0)], LayerContext::FreeRoam, start);
        registry.update_layer(&[vehicle("a", "t1", 10.0, 20.0)], LayerContext::FreeRoam, start);

        registry.advance(start + ANIMATION / 4);
        assert_eq!(registry.get("a").unwrap().displayed(), Coord { x: 2.5, y: 5.0 });
        assert!(registry.get("a").unwrap().is_animating());

        registry.advance(start + ANIMATION * 3);
        assert_eq!(registry.get("a").unwrap().displayed(), Coord { x: 10.0, y: 20.0 });
        assert!(!registry.get("a").unwrap().is_animating());
    }

    #[test]
    fn test_overlapping_animations_converge_to_latest() {
        let mut registry = registry();
        let start = Instant::now();

        registry.update_layer(&[vehicle("a", "t1", 0.0, 0.0)], LayerContext::FreeRoam, start);
        registry.update_layer(&[vehicle("a", "t1", 10.0, 0.0)], LayerContext::FreeRoam, start);
        registry.advance(start + ANIMATION / 2);

        let mid = start + ANIMATION / 2;
        registry.update_layer(&[vehicle("a", "t1", 10.0, 10.0)], LayerContext::FreeRoam, mid);
        registry.advance(mid + ANIMATION * 2);

        assert_eq!(registry.get("a").unwrap().displayed(), Coord { x: 10.0, y: 10.0 });
    }

    fn preview_response() -> GraphQlResponse {
        let stoptimes = ["A", "B", "C", "D"]
            .iter()
            .map(|id| {
                json!({
                    "stop": {"gtfsId": id, "name": id, "lat": 60.17, "lon": 24.94},
                    "scheduledDeparture": 0, "realtime": false, "serviceDay": 1768518000
                })
            })
            .collect::<Vec<_>>();
        serde_json::from_value(json!({
            "data": {"trip": {"gtfsId": "HSL:1", "stoptimesForDate": stoptimes}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_preview_toggles_and_caches() {
        let gateway = Arc::new(FakeGateway::with_fallback(preview_response()));
        let mut loader = TripPreviewLoader::new(
            gateway.clone(),
            ErrorClassifier::new(Arc::new(RecordingNotifier::default())),
            60,
        );
        let mut registry = registry();
        registry.update_layer(
            &[vehicle("v1", "HSL:1", 24.9, 60.1), vehicle("v2", "HSL:2", 24.8, 60.2)],
            LayerContext::FreeRoam,
            Instant::now(),
        );
        let tracked = leg(Some("HSL:1"), "A", "D");

        let shown = registry
            .toggle_preview("v1", &mut loader, Some(&tracked), 1_768_560_000)
            .await
            .unwrap();
        match shown {
            PreviewChange::Shown { trip_id, stops } => {
                assert_eq!(trip_id, "HSL:1");
                let ids = stops.iter().map(|s| s.gtfs_id.as_str()).collect::<Vec<_>>();
                assert_eq!(ids, vec!["B", "C"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(registry.preview_trip(), Some("HSL:1"));

        let cleared = registry
            .toggle_preview("v1", &mut loader, Some(&tracked), 1_768_560_000)
            .await
            .unwrap();
        assert_eq!(cleared, PreviewChange::Cleared { trip_id: "HSL:1".to_string() });
        assert_eq!(registry.preview_trip(), None);

        registry
            .toggle_preview("v1", &mut loader, Some(&tracked), 1_768_560_000)
            .await
            .unwrap();
        assert_eq!(gateway.calls(), 1);

        assert_eq!(
            registry
                .toggle_preview("ghost", &mut loader, None, 1_768_560_000)
                .await
                .unwrap(),
            PreviewChange::Ignored
        );
        assert_eq!(registry.preview_trip(), Some("HSL:1"));
    }

    #[tokio::test]
    async fn test_switching_preview_clears_previous() {
        let gateway = Arc::new(FakeGateway::with_fallback(preview_response()));
        let mut loader = TripPreviewLoader::new(
            gateway.clone(),
            ErrorClassifier::new(Arc::new(RecordingNotifier::default())),
            60,
        );
        let mut registry = registry();
        registry.update_layer(
            &[vehicle("v1", "HSL:1", 24.9, 60.1), vehicle("v2", "HSL:2", 24.8, 60.2)],
            LayerContext::FreeRoam,
            Instant::now(),
        );

        registry.toggle_preview("v1", &mut loader, None, 1_768_560_000).await.unwrap();
        registry.toggle_preview("v2", &mut loader, None, 1_768_560_000).await.unwrap();

        assert_eq!(registry.preview_trip(), Some("HSL:2"));
        assert!(registry
            .layer()
            .ops
            .contains(&LayerOp::ClearPreview("HSL:1".to_string())));
        // free-roam clicks carry no leg, so the whole trip is drawn
        assert_eq!(registry.layer().preview_stops, 4);
    }
}
