// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Message templates per query. Patterns are dotted paths; a `*` segment matches
//! any numeric index. Tables are searched in order and the first match wins.

pub type TemplateTable = &'static [(&'static str, &'static str)];

pub const FALLBACK_MESSAGE: &str = "Some data could not be loaded. Please try again later.";

pub const FALLBACK_LABEL: &str = "unknown";

pub const LABEL_PLACEHOLDER: &str = "{{label}}";

pub static PLAN_TEMPLATES: TemplateTable = &[
    ("plan", "Route search failed. Please try again later."),
    ("plan.itineraries", "No routes could be loaded for this search."),
    ("plan.itineraries.*", "Some data is missing for route #{{label}}."),
];

pub static TRIP_TEMPLATES: TemplateTable = &[
    ("trip", "Trip details are not available."),
    ("trip.stoptimesForDate", "Stop times are not available for this trip."),
    ("trip.alerts", "Service alerts could not be loaded for this trip."),
    ("trip_", "Trip details are not available for trip {{label}}."),
    ("trip_.stoptimesForDate", "Stop times are not available for trip {{label}}."),
    ("trip_.tripGeometry", "The route shape is not available for trip {{label}}."),
    ("trip_.vehiclePositions", "Vehicle position is not available for trip {{label}}."),
    ("trip_.pattern", "Vehicle position is not available for trip {{label}}."),
    ("trip_.pattern.vehiclePositions", "Vehicle position is not available for trip {{label}}."),
    ("trip_.alerts", "Service alerts could not be loaded for trip {{label}}."),
];

pub static VEHICLE_POSITIONS_TEMPLATES: TemplateTable = &[
    ("vehiclePositions", "Vehicle positions could not be loaded."),
    ("vehiclePositions.*", "The position of a vehicle on route {{label}} is not available."),
    ("vehiclePositions.*.trip", "Trip details are missing for a vehicle on route {{label}}."),
    ("vehiclePositions.*.stopRelationship", "The next stop of a vehicle on route {{label}} is unknown."),
];

pub static TRIP_PREVIEW_TEMPLATES: TemplateTable = &[
    ("trip", "Trip preview could not be loaded."),
    ("trip.stoptimesForDate", "Stops for this trip could not be loaded."),
    ("trip.route", "Route details for this trip are not available."),
];

fn segment_matches(pattern: &str, segment: &str) -> bool {
    pattern == segment
        || (pattern == "*" && (segment == "*" || segment.parse::<u64>().is_ok()))
}

/// First template whose pattern matches `path` segment by segment.
pub fn lookup(table: TemplateTable, path: &str) -> Option<&'static str> {
    let segments = path.split('.').collect::<Vec<_>>();

    table.iter().find_map(|(pattern, template)| {
        let pattern_segments = pattern.split('.').collect::<Vec<_>>();
        let matches = pattern_segments.len() == segments.len()
            && pattern_segments
                .iter()
                .zip(segments.iter())
                .all(|(p, s)| segment_matches(p, s));
        matches.then_some(*template)
    })
}

pub fn fill(template: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => template.replace(LABEL_PLACEHOLDER, label),
        None => template.replace(LABEL_PLACEHOLDER, FALLBACK_LABEL),
    }
}
