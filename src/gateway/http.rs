// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::TransitGateway;
use bytes::Bytes;
use crate::error::{Result, TrackerError};
use crate::graphql::{GraphQlRequest, GraphQlResponse};
use geojson::FeatureCollection;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Error body the relay sends with any 5xx.
#[derive(Deserialize, Debug)]
struct RelayErrorBody {
    error: String,
    #[serde(default)]
    detail: Option<String>,
}

/// Talks to the relay over HTTP. The relay injects provider headers and keys, so
/// requests here carry none.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|source| TrackerError::Http {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn read_body(&self, url: &str, response: reqwest::Response) -> Result<Bytes> {
        let status = response.status();
        let body = response.bytes().await.map_err(|source| TrackerError::Http {
            url: url.to_string(),
            source,
        })?;

        if status.is_success() {
            return Ok(body);
        }

        tracing::warn!(status = status.as_u16(), url, "Relay request failed");

        match serde_json::from_slice::<RelayErrorBody>(&body) {
            Ok(relay_error) => Err(TrackerError::Relay {
                status: status.as_u16(),
                error: relay_error.error,
                detail: relay_error.detail.unwrap_or_default(),
            }),
            Err(_) => Err(TrackerError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

impl TransitGateway for HttpGateway {
    async fn graphql(&self, request: GraphQlRequest) -> Result<GraphQlResponse> {
        let url = self.url("graphql");
        let body = serde_json::to_vec(&request)?;

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| TrackerError::Http {
                url: url.clone(),
                source,
            })?;

        let body = self.read_body(&url, response).await?;
        let parsed: GraphQlResponse = serde_json::from_slice(&body)?;

        if parsed.is_partial_failure() {
            tracing::debug!(
                errors = parsed.errors().len(),
                has_data = parsed.data.is_some(),
                "GraphQL response carried field errors"
            );
        }

        Ok(parsed)
    }

    async fn search_places(&self, query: &str, limit: u32) -> Result<FeatureCollection> {
        let url = self.url("search");
        let limit = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|source| TrackerError::Http {
                url: url.clone(),
                source,
            })?;

        let body = self.read_body(&url, response).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<Value> {
        let url = self.url("reverse");
        let lat = lat.to_string();
        let lon = lon.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("lat", lat.as_str()), ("lon", lon.as_str()), ("format", "json")])
            .send()
            .await
            .map_err(|source| TrackerError::Http {
                url: url.clone(),
                source,
            })?;

        let body = self.read_body(&url, response).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = HttpGateway::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.url("graphql"), "http://localhost:8080/graphql");
    }

    #[test]
    fn test_relay_error_body_parses() {
        let body: RelayErrorBody =
            serde_json::from_str(r#"{"error": "bad_gateway", "detail": "timeout"}"#).unwrap();
        assert_eq!(body.error, "bad_gateway");
        assert_eq!(body.detail.as_deref(), Some("timeout"));
    }
}
