// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Boundary to the relay that forwards GraphQL and REST calls upstream.

pub mod http;
pub mod queries;

use crate::error::Result;
use crate::graphql::{GraphQlRequest, GraphQlResponse};
use geojson::FeatureCollection;
use serde_json::Value;
use std::future::Future;

pub use http::HttpGateway;

/// Executes calls against the upstream providers. Transport failures are errors;
/// GraphQL field errors come back inside an `Ok` response.
pub trait TransitGateway: Send + Sync + 'static {
    fn graphql(
        &self,
        request: GraphQlRequest,
    ) -> impl Future<Output = Result<GraphQlResponse>> + Send;

    fn search_places(
        &self,
        query: &str,
        limit: u32,
    ) -> impl Future<Output = Result<FeatureCollection>> + Send;

    fn reverse_geocode(&self, lat: f64, lon: f64) -> impl Future<Output = Result<Value>> + Send;
}
