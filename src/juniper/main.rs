// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use anyhow::{anyhow, Context};
use catenary_tracker::classifier::{ApiContext, ErrorClassifier, TracingNotifier};
use catenary_tracker::config::TrackerConfig;
use catenary_tracker::gateway::queries::{plan_query, BoundingBox, PlanParams};
use catenary_tracker::gateway::{HttpGateway, TransitGateway};
use catenary_tracker::itinerary::{parse_plan, TrackedRoute};
use catenary_tracker::markers::feed::fetch_free_roam;
use catenary_tracker::markers::{LayerContext, MarkerRegistry, TracingLayer, TripPreviewLoader};
use catenary_tracker::polling::poll;
use catenary_tracker::settings::SettingsHandle;
use catenary_tracker::tracker::{TrackingEvent, TrackingSession};
use clap::Parser;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Overrides TRACKER_RELAY_URL
    #[arg(long, global = true)]
    relay_url: Option<String>,
    /// Overrides TRACKER_POLL_INTERVAL_MS
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,
    /// Fetch once instead of polling
    #[arg(long, global = true)]
    no_auto_update: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct Endpoints {
    #[arg(allow_negative_numbers = true)]
    from_lat: f64,
    #[arg(allow_negative_numbers = true)]
    from_lon: f64,
    #[arg(allow_negative_numbers = true)]
    to_lat: f64,
    #[arg(allow_negative_numbers = true)]
    to_lon: f64,
    /// YYYY-MM-DD
    #[arg(long)]
    date: Option<String>,
    /// HH:MM
    #[arg(long)]
    time: Option<String>,
    #[arg(long, default_value_t = 3)]
    itineraries: u32,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Plan a route and print the itineraries
    Plan {
        #[command(flatten)]
        endpoints: Endpoints,
    },
    /// Plan a route and follow one of its legs live
    Track {
        #[command(flatten)]
        endpoints: Endpoints,
        #[arg(long, default_value_t = 0)]
        itinerary: usize,
        /// Leg index; the first transit leg when omitted
        #[arg(long)]
        leg: Option<usize>,
    },
    /// Follow every vehicle in a bounding box
    Roam {
        #[arg(allow_negative_numbers = true)]
        min_lat: f64,
        #[arg(allow_negative_numbers = true)]
        min_lon: f64,
        #[arg(allow_negative_numbers = true)]
        max_lat: f64,
        #[arg(allow_negative_numbers = true)]
        max_lon: f64,
        #[arg(long, default_value_t = 13)]
        zoom: u8,
        /// Vehicle id whose trip is previewed once it appears
        #[arg(long)]
        preview: Option<String>,
    },
    /// Search places by name
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
    /// Reverse geocode a coordinate
    Reverse {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
    },
}

fn load_config(args: &Args) -> anyhow::Result<TrackerConfig> {
    let config = TrackerConfig::from_lookup(|key| match key {
        "TRACKER_RELAY_URL" => args
            .relay_url
            .clone()
            .or_else(|| std::env::var(key).ok()),
        "TRACKER_POLL_INTERVAL_MS" => args
            .poll_interval_ms
            .map(|ms| ms.to_string())
            .or_else(|| std::env::var(key).ok()),
        "TRACKER_AUTO_UPDATE" if args.no_auto_update => Some("false".to_string()),
        _ => std::env::var(key).ok(),
    })?;
    Ok(config)
}

async fn plan_routes(
    gateway: &HttpGateway,
    classifier: &ErrorClassifier,
    endpoints: &Endpoints,
) -> anyhow::Result<Vec<TrackedRoute>> {
    let params = PlanParams {
        from: (endpoints.from_lat, endpoints.from_lon),
        to: (endpoints.to_lat, endpoints.to_lon),
        date: endpoints.date.clone(),
        time: endpoints.time.clone(),
        num_itineraries: endpoints.itineraries,
    };

    let response = gateway.graphql(plan_query(&params)).await?;
    classifier.report(ApiContext::Plan, &response);

    Ok(response.data.as_ref().map(parse_plan).unwrap_or_default())
}

async fn track(
    gateway: Arc<HttpGateway>,
    classifier: ErrorClassifier,
    settings: SettingsHandle,
    config: &TrackerConfig,
    endpoints: &Endpoints,
    itinerary: usize,
    leg: Option<usize>,
) -> anyhow::Result<()> {
    let routes = plan_routes(&gateway, &classifier, endpoints).await?;
    let route = routes
        .get(itinerary)
        .ok_or_else(|| anyhow!("Planner returned {} itineraries", routes.len()))?;

    let selected = match leg {
        Some(index) => route.legs.get(index),
        None => route.transit_legs().next(),
    }
    .cloned()
    .context("No leg to track")?;

    tracing::info!(
        mode = ?selected.mode,
        route = ?selected.label(),
        from = ?selected.from_name,
        to = ?selected.to_name,
        "Selected leg"
    );

    let (mut session, mut events) =
        TrackingSession::new(gateway, settings.subscribe(), classifier);
    session.select_leg(Some(selected));

    let mut registry = MarkerRegistry::new(TracingLayer::default(), config.animation_duration);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TrackingEvent::Loading) => tracing::info!("Loading trip"),
                Some(TrackingEvent::Snapshot(snapshot)) => {
                    if let Some(vehicle) = snapshot.vehicle.clone() {
                        registry.update_layer(&[vehicle], LayerContext::SingleTrip, Instant::now());
                    }
                    println!("{}", serde_json::to_string(&snapshot)?);
                }
                Some(TrackingEvent::Finished(trip)) => {
                    tracing::info!(trip = %trip, "Trip finished");
                    return Ok(());
                }
                Some(TrackingEvent::Failed(message)) => {
                    return Err(anyhow!(message));
                }
                None => return Ok(()),
            },
            _ = tokio::time::sleep(FRAME_INTERVAL) => registry.advance(Instant::now()),
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn roam(
    gateway: Arc<HttpGateway>,
    classifier: ErrorClassifier,
    settings: SettingsHandle,
    config: &TrackerConfig,
    bounds: BoundingBox,
    zoom: u8,
    preview: Option<String>,
) -> anyhow::Result<()> {
    let mut registry = MarkerRegistry::new(TracingLayer::default(), config.animation_duration);
    let mut loader =
        TripPreviewLoader::new(gateway.clone(), classifier.clone(), config.delay_threshold_secs);
    let mut pending_preview = preview;

    let fetch_gateway = gateway.clone();
    let fetch_classifier = classifier.clone();
    let mut vehicles = poll(settings.subscribe(), move || {
        let gateway = fetch_gateway.clone();
        let classifier = fetch_classifier.clone();
        async move { fetch_free_roam(gateway.as_ref(), &classifier, &bounds, zoom).await }
    });

    let mut frames = tokio::time::interval(FRAME_INTERVAL);

    loop {
        tokio::select! {
            batch = vehicles.next() => match batch {
                Some(Ok(fresh)) => {
                    registry.update_layer(&fresh, LayerContext::FreeRoam, Instant::now());
                    tracing::info!(markers = registry.len(), "Vehicles updated");

                    if let Some(vehicle_id) = pending_preview.as_deref() {
                        if registry.get(vehicle_id).is_some() {
                            registry
                                .toggle_preview(vehicle_id, &mut loader, None, catenary_tracker::unix_now())
                                .await?;
                            pending_preview = None;
                        }
                    }
                }
                Some(Err(err)) => {
                    classifier.report_failure(ApiContext::VehiclePositions, &err);
                    return Err(err.into());
                }
                None => return Ok(()),
            },
            _ = frames.tick() => registry.advance(Instant::now()),
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let settings = SettingsHandle::new(config.initial_settings());
    let gateway = Arc::new(HttpGateway::new(
        config.relay_url.clone(),
        config.request_timeout,
    )?);
    let classifier = ErrorClassifier::new(Arc::new(TracingNotifier));

    match args.cmd {
        Command::Plan { endpoints } => {
            let routes = plan_routes(&gateway, &classifier, &endpoints).await?;
            println!("{}", serde_json::to_string_pretty(&routes)?);
        }
        Command::Track {
            endpoints,
            itinerary,
            leg,
        } => {
            track(
                gateway, classifier, settings, &config, &endpoints, itinerary, leg,
            )
            .await?;
        }
        Command::Roam {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
            zoom,
            preview,
        } => {
            let bounds = BoundingBox {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            };
            roam(gateway, classifier, settings, &config, bounds, zoom, preview).await?;
        }
        Command::Search { query, limit } => {
            let places = gateway.search_places(&query, limit).await?;
            println!("{}", serde_json::to_string_pretty(&places)?);
        }
        Command::Reverse { lat, lon } => {
            let place = gateway.reverse_geocode(lat, lon).await?;
            println!("{}", serde_json::to_string_pretty(&place)?);
        }
    }

    Ok(())
}
