// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use geo::{Coord, LineString, Point};
use serde::{Deserialize, Serialize};

#[derive(Eq, PartialEq, Hash, Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportMode {
    Bus,
    Tram,
    Subway,
    Rail,
    Ferry,
    Trolleybus,
    Funicular,
    #[serde(other)]
    Other,
}

impl TransportMode {
    pub const ALL: [TransportMode; 8] = [
        TransportMode::Bus,
        TransportMode::Tram,
        TransportMode::Subway,
        TransportMode::Rail,
        TransportMode::Ferry,
        TransportMode::Trolleybus,
        TransportMode::Funicular,
        TransportMode::Other,
    ];

    pub fn as_graphql(&self) -> &'static str {
        match self {
            TransportMode::Bus => "BUS",
            TransportMode::Tram => "TRAM",
            TransportMode::Subway => "SUBWAY",
            TransportMode::Rail => "RAIL",
            TransportMode::Ferry => "FERRY",
            TransportMode::Trolleybus => "TROLLEYBUS",
            TransportMode::Funicular => "FUNICULAR",
            TransportMode::Other => "OTHER",
        }
    }

    /// Default marker colour when the route carries none.
    pub fn color(&self) -> &'static str {
        match self {
            TransportMode::Bus => "#009FE3",
            TransportMode::Tram => "#FFD800",
            TransportMode::Subway => "#E41F18",
            TransportMode::Rail => "#333333",
            TransportMode::Ferry => "#2A4E9D",
            TransportMode::Trolleybus => "#E5231B",
            TransportMode::Funicular => "#884200",
            TransportMode::Other => "#6B6B6B",
        }
    }

    /// Rail and ferry services are known by their long names, everything else by
    /// the short route number.
    pub fn prefers_long_name(&self) -> bool {
        matches!(self, TransportMode::Rail | TransportMode::Ferry)
    }

    /// Smallest map zoom at which free-roam vehicles of this mode are requested.
    pub fn min_zoom(&self) -> u8 {
        match self {
            TransportMode::Rail => 7,
            TransportMode::Subway | TransportMode::Tram | TransportMode::Funicular => 8,
            TransportMode::Bus | TransportMode::Trolleybus => 12,
            TransportMode::Ferry | TransportMode::Other => 5,
        }
    }
}

pub fn modes_for_zoom(zoom: u8) -> Vec<TransportMode> {
    TransportMode::ALL
        .into_iter()
        .filter(|mode| zoom >= mode.min_zoom())
        .collect()
}

/// Picks the display name for a route according to its mode, falling back to
/// whichever name is present.
pub fn route_label(
    mode: TransportMode,
    short_name: Option<&str>,
    long_name: Option<&str>,
) -> Option<String> {
    let short_name = short_name.filter(|s| !s.is_empty());
    let long_name = long_name.filter(|s| !s.is_empty());

    let chosen = match mode.prefers_long_name() {
        true => long_name.or(short_name),
        false => short_name.or(long_name),
    };

    chosen.map(|s| s.to_string())
}

#[derive(Eq, PartialEq, Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum DelayStatus {
    Early,
    OnTime,
    Late,
}

impl DelayStatus {
    /// Delay and threshold are both in seconds.
    pub fn classify(delay_secs: i64, threshold_secs: i64) -> DelayStatus {
        if delay_secs < 0 {
            DelayStatus::Early
        } else if delay_secs < threshold_secs {
            DelayStatus::OnTime
        } else {
            DelayStatus::Late
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StopRecord {
    pub gtfs_id: String,
    pub name: String,
    pub geometry: Point<f64>,
    pub scheduled_arrival: i64,
    pub realtime_arrival: i64,
    pub scheduled_departure: i64,
    pub realtime_departure: i64,
    pub realtime: bool,
    pub delay: i64,
    pub status: DelayStatus,
    pub is_passed: bool,
    pub is_arrived: bool,
}

impl StopRecord {
    pub fn delay_adjusted_departure(&self) -> i64 {
        match self.realtime {
            true => self.realtime_departure,
            false => self.scheduled_departure + self.delay,
        }
    }

    pub fn delay_adjusted_arrival(&self) -> i64 {
        match self.realtime {
            true => self.realtime_arrival,
            false => self.scheduled_arrival + self.delay,
        }
    }
}

/// Position of the stop with exactly this id. `None` stands for "not found" and
/// must never be turned into an array position.
pub fn stop_index(stops: &[StopRecord], gtfs_id: &str) -> Option<usize> {
    stops.iter().position(|stop| stop.gtfs_id == gtfs_id)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VehiclePosition {
    pub vehicle_id: String,
    pub coordinates: Coord<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub mode: TransportMode,
    pub trip_id: Option<String>,
    pub label: String,
    pub current_stop_id: Option<String>,
    pub color: String,
    pub trail: LineString<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub id: Option<String>,
    pub header: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub effective_start: Option<i64>,
    pub effective_end: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TripSnapshot {
    pub gtfs_id: String,
    pub stops: Vec<StopRecord>,
    pub vehicle: Option<VehiclePosition>,
    pub alerts: Vec<Alert>,
    pub is_finished: bool,
}

impl TripSnapshot {
    pub fn final_stop(&self) -> Option<&StopRecord> {
        self.stops.last()
    }
}
