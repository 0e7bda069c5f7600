// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::classifier::{ApiContext, ErrorClassifier};
use crate::error::Result;
use crate::gateway::queries::{trip_preview_query, TripKey};
use crate::gateway::TransitGateway;
use crate::model::{stop_index, StopRecord};
use crate::normalizer::{normalize, raw_trip_at};
use ahash::AHashMap;
use std::sync::Arc;

/// Normalized stop lists by trip gtfsId. Entries live for the whole process.
#[derive(Default, Debug)]
pub struct TripStopCache {
    stops: AHashMap<String, Arc<Vec<StopRecord>>>,
}

impl TripStopCache {
    pub fn get(&self, trip_id: &str) -> Option<Arc<Vec<StopRecord>>> {
        self.stops.get(trip_id).cloned()
    }

    pub fn insert(&mut self, trip_id: String, stops: Vec<StopRecord>) -> Arc<Vec<StopRecord>> {
        let stops = Arc::new(stops);
        self.stops.insert(trip_id, stops.clone());
        stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}

/// Stops strictly between the `(origin, destination)` stop ids. Without bounds the
/// whole list is returned. Unknown or inverted bounds give an empty window.
pub fn stop_window(stops: &[StopRecord], bounds: Option<(&str, &str)>) -> Vec<StopRecord> {
    let Some((origin, destination)) = bounds else {
        return stops.to_vec();
    };

    match (stop_index(stops, origin), stop_index(stops, destination)) {
        (Some(origin), Some(destination)) if origin < destination => {
            stops[origin + 1..destination].to_vec()
        }
        _ => vec![],
    }
}

pub struct TripPreviewLoader<G: TransitGateway> {
    gateway: Arc<G>,
    classifier: ErrorClassifier,
    delay_threshold_secs: i64,
    cache: TripStopCache,
}

impl<G: TransitGateway> TripPreviewLoader<G> {
    pub fn new(gateway: Arc<G>, classifier: ErrorClassifier, delay_threshold_secs: i64) -> Self {
        TripPreviewLoader {
            gateway,
            classifier,
            delay_threshold_secs,
            cache: TripStopCache::default(),
        }
    }

    pub fn cache(&self) -> &TripStopCache {
        &self.cache
    }

    async fn stops(&mut self, key: &TripKey) -> Result<Arc<Vec<StopRecord>>> {
        if let Some(stops) = self.cache.get(&key.gtfs_id) {
            return Ok(stops);
        }

        let response = match self.gateway.graphql(trip_preview_query(key)).await {
            Ok(response) => response,
            Err(err) => {
                self.classifier.report_failure(ApiContext::TripPreview, &err);
                return Err(err);
            }
        };
        self.classifier.report(ApiContext::TripPreview, &response);

        let raw = response
            .data
            .as_ref()
            .and_then(|data| raw_trip_at(data, "trip"));

        match raw {
            Some(raw) => {
                let snapshot = normalize(&raw, self.delay_threshold_secs);
                tracing::debug!(trip = %key.gtfs_id, stops = snapshot.stops.len(), "Cached trip preview stops");
                Ok(self.cache.insert(key.gtfs_id.clone(), snapshot.stops))
            }
            // not cached, the next click tries again
            None => Ok(Arc::new(vec![])),
        }
    }

    pub async fn load_window(
        &mut self,
        key: &TripKey,
        bounds: Option<(&str, &str)>,
    ) -> Result<Vec<StopRecord>> {
        let stops = self.stops(key).await?;
        Ok(stop_window(&stops, bounds))
    }
}
