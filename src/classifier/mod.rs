// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Turns GraphQL field errors that arrive with HTTP 200 into messages a rider can
//! read. Each query context picks one strategy and one template table.

pub mod templates;

use crate::error::TrackerError;
use crate::graphql::{dotted_path, GraphQlResponse, PathSegment};
use crate::model::{route_label, TransportMode};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use templates::{
    fill, lookup, TemplateTable, FALLBACK_MESSAGE, PLAN_TEMPLATES, TRIP_PREVIEW_TEMPLATES,
    TRIP_TEMPLATES, VEHICLE_POSITIONS_TEMPLATES,
};

lazy_static! {
    static ref TRAILING_DIGITS_REGEX: Regex = Regex::new(r"\d+$").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiContext {
    Plan,
    Trip,
    VehiclePositionsForTrips,
    VehiclePositions,
    TripPreview,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Simple,
    Indexed,
    Labeled,
}

impl ApiContext {
    pub fn strategy(&self) -> Strategy {
        match self {
            ApiContext::Plan => Strategy::Indexed,
            ApiContext::Trip
            | ApiContext::VehiclePositionsForTrips
            | ApiContext::VehiclePositions => Strategy::Labeled,
            ApiContext::TripPreview => Strategy::Simple,
        }
    }

    pub fn templates(&self) -> TemplateTable {
        match self {
            ApiContext::Plan => PLAN_TEMPLATES,
            ApiContext::Trip | ApiContext::VehiclePositionsForTrips => TRIP_TEMPLATES,
            ApiContext::VehiclePositions => VEHICLE_POSITIONS_TEMPLATES,
            ApiContext::TripPreview => TRIP_PREVIEW_TEMPLATES,
        }
    }
}

/// Whether the part of `data` an error points into is keyed by alias or is a list
/// of records.
#[derive(Debug, Clone, Copy)]
pub enum ResponseShape<'a> {
    Keyed(&'a Map<String, Value>),
    Listed(&'a [Value]),
    Missing,
}

impl<'a> ResponseShape<'a> {
    pub fn of(data: Option<&'a Value>, first: &PathSegment) -> Self {
        match data {
            Some(Value::Array(items)) => ResponseShape::Listed(items),
            Some(Value::Object(map)) => match map.get(&first.to_string()) {
                Some(Value::Array(items)) => ResponseShape::Listed(items),
                _ => ResponseShape::Keyed(map),
            },
            _ => ResponseShape::Missing,
        }
    }
}

pub fn strip_trailing_digits(segment: &str) -> &str {
    match TRAILING_DIGITS_REGEX.find(segment) {
        Some(found) => &segment[..found.start()],
        None => segment,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteNames {
    short_name: Option<String>,
    long_name: Option<String>,
    mode: Option<TransportMode>,
}

fn keyed_label(sub_result: &Value) -> Option<String> {
    let route = sub_result.get("route")?;
    let names = RouteNames::deserialize(route).ok()?;
    route_label(
        names.mode.unwrap_or(TransportMode::Other),
        names.short_name.as_deref(),
        names.long_name.as_deref(),
    )
}

fn listed_label(record: &Value) -> Option<String> {
    record
        .pointer("/trip/route/shortName")
        .and_then(|name| name.as_str())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
}

fn simple_message(table: TemplateTable, path: &[PathSegment]) -> String {
    lookup(table, &dotted_path(path))
        .map(|template| fill(template, None))
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
}

fn indexed_message(table: TemplateTable, path: &[PathSegment]) -> String {
    let index = match path {
        [_, _, third] => third.as_index(),
        _ => None,
    };

    let Some(index) = index else {
        return simple_message(table, path);
    };

    let pattern = format!("{}.{}.*", path[0], path[1]);
    let label = index.saturating_add(1).to_string();
    lookup(table, &pattern)
        .map(|template| fill(template, Some(&label)))
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
}

fn labeled_message(table: TemplateTable, data: Option<&Value>, path: &[PathSegment]) -> String {
    let Some(first) = path.first() else {
        return FALLBACK_MESSAGE.to_string();
    };
    let first_key = first.to_string();

    let (head, label) = match ResponseShape::of(data, first) {
        ResponseShape::Keyed(map) => {
            let stripped = strip_trailing_digits(&first_key);
            let label = map
                .get(&first_key)
                .or_else(|| map.get(stripped))
                .and_then(keyed_label);
            (stripped.to_string(), label)
        }
        ResponseShape::Listed(items) => {
            let label = path
                .get(1)
                .and_then(|segment| segment.as_index())
                .and_then(|index| items.get(index as usize))
                .and_then(listed_label);
            (first_key.clone(), label)
        }
        ResponseShape::Missing => (strip_trailing_digits(&first_key).to_string(), None),
    };

    let pattern = std::iter::once(head)
        .chain(path.iter().enumerate().skip(1).map(|(i, segment)| {
            match (i, segment.as_index()) {
                (1, Some(_)) => "*".to_string(),
                _ => segment.to_string(),
            }
        }))
        .join(".");

    lookup(table, &pattern)
        .map(|template| fill(template, label.as_deref()))
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
}

/// The message for a response, or `None` when it carried no errors. Duplicate paths
/// are collapsed; every remaining path yields one line.
pub fn classify(context: ApiContext, response: &GraphQlResponse) -> Option<String> {
    let errors = response.errors();
    if errors.is_empty() {
        return None;
    }

    let table = context.templates();
    let data = response.data.as_ref();

    let message = errors
        .iter()
        .map(|error| error.path.as_slice())
        .unique()
        .map(|path| match context.strategy() {
            Strategy::Simple => simple_message(table, path),
            Strategy::Indexed => indexed_message(table, path),
            Strategy::Labeled => labeled_message(table, data, path),
        })
        .join("\n");

    Some(message)
}

/// Where classified messages are shown to the rider.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, message: &str);
}

pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        tracing::warn!(message, "Rider notification");
    }
}

#[derive(Clone)]
pub struct ErrorClassifier {
    notifier: Arc<dyn Notifier>,
}

impl ErrorClassifier {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Sends exactly one notification when `response` carries errors and none
    /// otherwise. Returns what was sent.
    pub fn report(&self, context: ApiContext, response: &GraphQlResponse) -> Option<String> {
        let message = classify(context, response)?;
        tracing::debug!(
            context = ?context,
            errors = response.errors().len(),
            "Classified partial GraphQL failure"
        );
        self.notifier.notify(&message);
        Some(message)
    }

    /// Transport failures get the generic message.
    pub fn report_failure(&self, context: ApiContext, error: &TrackerError) {
        tracing::warn!(context = ?context, error = %error, "Request failed");
        self.notifier.notify(FALLBACK_MESSAGE);
    }
}
