// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Drives a `TripProgressTracker` for the selected leg and publishes what it sees.

use super::TripProgressTracker;
use crate::classifier::{ApiContext, ErrorClassifier};
use crate::gateway::queries::{trip_alias, trips_query, TripKey};
use crate::gateway::TransitGateway;
use crate::graphql::GraphQlResponse;
use crate::itinerary::Sequence;
use crate::model::TripSnapshot;
use crate::normalizer::{normalize, raw_trip_at};
use crate::polling::{once, poll, PollHandle, PollStream, SharedPoller};
use crate::settings::Settings;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub enum TrackingEvent {
    /// A fresh tracker started for the leg.
    Loading,
    Snapshot(TripSnapshot),
    /// Trip gtfsId that completed.
    Finished(String),
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateMode {
    Continuous,
    Once,
}

impl UpdateMode {
    fn from_auto_update(auto_update: bool) -> Self {
        match auto_update {
            true => UpdateMode::Continuous,
            false => UpdateMode::Once,
        }
    }
}

pub type TripPoller = SharedPoller<(TripKey, UpdateMode), GraphQlResponse>;

pub struct TrackingSession<G: TransitGateway> {
    gateway: Arc<G>,
    settings: watch::Receiver<Settings>,
    classifier: ErrorClassifier,
    poller: TripPoller,
    events: mpsc::Sender<TrackingEvent>,
    clock: fn() -> i64,
    leg: Option<Sequence>,
    auto_update: Option<bool>,
    driver: Option<PollHandle>,
}

impl<G: TransitGateway> TrackingSession<G> {
    pub fn new(
        gateway: Arc<G>,
        settings: watch::Receiver<Settings>,
        classifier: ErrorClassifier,
    ) -> (Self, mpsc::Receiver<TrackingEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session = TrackingSession {
            gateway,
            settings,
            classifier,
            poller: TripPoller::new(),
            events,
            clock: crate::unix_now,
            leg: None,
            auto_update: None,
            driver: None,
        };
        (session, rx)
    }

    /// Shares trip polls with other sessions built on the same poller.
    pub fn with_poller(mut self, poller: TripPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn leg(&self) -> Option<&Sequence> {
        self.leg.as_ref()
    }

    pub fn is_polling(&self) -> bool {
        self.driver.as_ref().is_some_and(|driver| !driver.is_finished())
    }

    /// Switches to `leg`, cancelling whatever ran before. `None` or a leg without a
    /// trip leaves the session idle.
    pub fn select_leg(&mut self, leg: Option<Sequence>) {
        self.leg = leg;
        self.restart();
    }

    /// Overrides the auto-update setting for this session.
    pub fn set_auto_update(&mut self, enabled: bool) {
        if self.auto_update == Some(enabled) {
            return;
        }
        self.auto_update = Some(enabled);
        self.restart();
    }

    fn restart(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.cancel();
        }

        let Some(leg) = self.leg.clone() else {
            return;
        };
        let Some(key) = leg.trip_key() else {
            tracing::debug!(mode = ?leg.mode, "Leg has no trip, tracker stays idle");
            return;
        };

        tracing::info!(trip = %key.gtfs_id, "Tracking leg");

        let driver = Driver {
            gateway: self.gateway.clone(),
            settings: self.settings.clone(),
            classifier: self.classifier.clone(),
            poller: self.poller.clone(),
            events: self.events.clone(),
            clock: self.clock,
            auto_update: self.auto_update,
        };
        self.driver = Some(PollHandle::spawn(driver.run(leg, key)));
    }
}

struct Driver<G: TransitGateway> {
    gateway: Arc<G>,
    settings: watch::Receiver<Settings>,
    classifier: ErrorClassifier,
    poller: TripPoller,
    events: mpsc::Sender<TrackingEvent>,
    clock: fn() -> i64,
    auto_update: Option<bool>,
}

enum Step {
    Continue,
    Stop,
}

impl<G: TransitGateway> Driver<G> {
    fn current_mode(&self) -> UpdateMode {
        UpdateMode::from_auto_update(
            self.auto_update
                .unwrap_or_else(|| self.settings.borrow().auto_update),
        )
    }

    fn start(&self, key: &TripKey, mode: UpdateMode) -> PollStream<GraphQlResponse> {
        let gateway = self.gateway.clone();
        let request = trips_query(std::slice::from_ref(key));
        let fetch = move || {
            let gateway = gateway.clone();
            let request = request.clone();
            async move { gateway.graphql(request).await }
        };

        match mode {
            UpdateMode::Continuous => poll(self.settings.clone(), fetch),
            UpdateMode::Once => once(fetch),
        }
    }

    async fn run(mut self, leg: Sequence, key: TripKey) {
        loop {
            let mode = self.current_mode();
            let mut tracker = TripProgressTracker::new(&leg);

            if self.events.send(TrackingEvent::Loading).await.is_err() {
                return;
            }

            let mut subscription = self
                .poller
                .subscribe((key.clone(), mode), || self.start(&key, mode));

            let mut stream_open = true;
            let mut settings_open = self.auto_update.is_none();

            loop {
                if !stream_open && !settings_open {
                    return;
                }

                tokio::select! {
                    outcome = subscription.next(), if stream_open => {
                        let step = match outcome {
                            None => {
                                stream_open = false;
                                Step::Continue
                            }
                            Some(Ok(response)) => self.handle_response(&mut tracker, &response).await,
                            Some(Err(err)) => {
                                self.classifier.report_failure(ApiContext::Trip, &err);
                                let _ = self.events.send(TrackingEvent::Failed(err.to_string())).await;
                                Step::Stop
                            }
                        };
                        if let Step::Stop = step {
                            return;
                        }
                    }
                    changed = self.settings.changed(), if settings_open => {
                        if changed.is_err() {
                            settings_open = false;
                            continue;
                        }
                        if self.current_mode() != mode {
                            tracing::info!(trip = %key.gtfs_id, mode = ?self.current_mode(), "Auto-update toggled, restarting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_response(
        &self,
        tracker: &mut TripProgressTracker,
        response: &GraphQlResponse,
    ) -> Step {
        self.classifier.report(ApiContext::Trip, response);

        let raw = response
            .data
            .as_ref()
            .and_then(|data| raw_trip_at(data, &trip_alias(0)));
        let Some(raw) = raw else {
            tracing::debug!("Trip response carried no trip");
            return Step::Continue;
        };

        let threshold = self.settings.borrow().delay_threshold_secs;
        let Some(published) = tracker.observe(normalize(&raw, threshold), (self.clock)()) else {
            return Step::Stop;
        };

        let finished = published.is_finished;
        let gtfs_id = published.gtfs_id.clone();
        if self.events.send(TrackingEvent::Snapshot(published)).await.is_err() {
            return Step::Stop;
        }

        if finished {
            let _ = self.events.send(TrackingEvent::Finished(gtfs_id)).await;
            return Step::Stop;
        }

        Step::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::templates::FALLBACK_MESSAGE;
    use crate::classifier::testing::RecordingNotifier;
    use crate::error::TrackerError;
    use crate::gateway::fake::FakeGateway;
    use crate::itinerary::test_fixtures::leg;
    use crate::settings::SettingsHandle;
    use serde_json::json;
    use std::time::Duration;

    const NOW: i64 = 1_768_560_000;

    fn fixed_now() -> i64 {
        NOW
    }

    fn trip_response(final_departure: i64) -> GraphQlResponse {
        let stoptime = |id: &str, departure: i64| {
            json!({
                "stop": {"gtfsId": id, "name": id, "lat": 60.17, "lon": 24.94},
                "scheduledArrival": departure, "realtimeArrival": departure,
                "scheduledDeparture": departure, "realtimeDeparture": departure,
                "realtime": true, "serviceDay": 0
            })
        };
        serde_json::from_value(json!({
            "data": {
                "trip_0": {
                    "gtfsId": "HSL:1",
                    "route": {"shortName": "7", "mode": "BUS"},
                    "stoptimesForDate": [
                        stoptime("A", final_departure - 600),
                        stoptime("B", final_departure - 300),
                        stoptime("C", final_departure)
                    ],
                    "pattern": {"vehiclePositions": [{
                        "vehicleId": "v1", "lat": 60.17, "lon": 24.94,
                        "stopRelationship": {"stop": {"gtfsId": "B"}},
                        "trip": {"gtfsId": "HSL:1"}
                    }]}
                }
            }
        }))
        .unwrap()
    }

    struct Harness {
        gateway: Arc<FakeGateway>,
        settings: SettingsHandle,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new(auto_update: bool, response: GraphQlResponse) -> Self {
            let settings = SettingsHandle::new(Settings {
                poll_interval: Duration::from_secs(10),
                auto_update,
                delay_threshold_secs: 60,
            });
            Harness {
                gateway: Arc::new(FakeGateway::with_fallback(response)),
                settings,
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn session(&self) -> (TrackingSession<FakeGateway>, mpsc::Receiver<TrackingEvent>) {
            let (session, rx) = TrackingSession::new(
                self.gateway.clone(),
                self.settings.subscribe(),
                ErrorClassifier::new(self.notifier.clone()),
            );
            (session.with_clock(fixed_now), rx)
        }
    }

    fn snapshot(event: Option<TrackingEvent>) -> TripSnapshot {
        match event {
            Some(TrackingEvent::Snapshot(snapshot)) => snapshot,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_trip_stops_polling() {
        let harness = Harness::new(true, trip_response(NOW - 300));
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        let published = snapshot(rx.recv().await);
        assert!(published.is_finished);
        assert!(published.stops[1].is_passed);
        assert_eq!(rx.recv().await, Some(TrackingEvent::Finished("HSL:1".to_string())));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.gateway.calls(), 1);
        assert!(!session.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_trip_polls_on_interval() {
        let harness = Harness::new(true, trip_response(NOW + 3_600));
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        assert!(!snapshot(rx.recv().await).is_finished);
        assert!(!snapshot(rx.recv().await).is_finished);
        assert_eq!(harness.gateway.calls(), 2);

        let request = harness.gateway.requests.lock().unwrap()[0].clone();
        assert_eq!(request.variables["id0"], "HSL:1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_walking_leg_issues_no_requests() {
        let harness = Harness::new(true, trip_response(NOW + 3_600));
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(None, "A", "B")));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(harness.gateway.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deselecting_cancels_poll() {
        let harness = Harness::new(true, trip_response(NOW + 3_600));
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        snapshot(rx.recv().await);
        session.select_leg(None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.gateway.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_trips_replaces_the_poll() {
        let harness = Harness::new(true, trip_response(NOW + 3_600));
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        assert!(snapshot(rx.recv().await).stops[1].is_passed);

        session.select_leg(Some(leg(Some("HSL:2"), "B", "C")));
        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        // fresh tracker: B is the new origin, not a passed stop
        assert!(!snapshot(rx.recv().await).stops[1].is_passed);

        tokio::time::sleep(Duration::from_secs(35)).await;
        let requests = harness.gateway.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].variables["id0"], "HSL:1");
        assert!(requests[1..]
            .iter()
            .all(|request| request.variables["id0"] == "HSL:2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_fails_once() {
        let harness = Harness::new(true, trip_response(NOW + 3_600));
        harness.gateway.push(Err(TrackerError::Status {
            status: 502,
            url: "http://relay/graphql".to_string(),
        }));
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        assert!(matches!(rx.recv().await, Some(TrackingEvent::Failed(_))));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.gateway.calls(), 1);
        assert_eq!(harness.notifier.messages(), vec![FALLBACK_MESSAGE.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_update_toggle_restarts_leg() {
        let harness = Harness::new(false, trip_response(NOW + 3_600));
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        snapshot(rx.recv().await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.gateway.calls(), 1);

        harness.settings.set_auto_update(true);
        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        snapshot(rx.recv().await);
        snapshot(rx.recv().await);
        assert_eq!(harness.gateway.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_override_switches_to_once() {
        let harness = Harness::new(true, trip_response(NOW + 3_600));
        let (mut session, mut rx) = harness.session();
        session.set_auto_update(false);
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        snapshot(rx.recv().await);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.gateway.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_on_one_trip_share_a_poll() {
        let harness = Harness::new(true, trip_response(NOW + 3_600));
        let poller = TripPoller::new();

        let (first, mut first_rx) = harness.session();
        let (second, mut second_rx) = harness.session();
        let mut first = first.with_poller(poller.clone());
        let mut second = second.with_poller(poller.clone());

        first.select_leg(Some(leg(Some("HSL:1"), "A", "C")));
        assert_eq!(first_rx.recv().await, Some(TrackingEvent::Loading));
        snapshot(first_rx.recv().await);

        second.select_leg(Some(leg(Some("HSL:1"), "B", "C")));
        assert_eq!(second_rx.recv().await, Some(TrackingEvent::Loading));
        snapshot(second_rx.recv().await);

        assert_eq!(harness.gateway.calls(), 1);
        let key = (TripKey::new("HSL:1", "20260116"), UpdateMode::Continuous);
        assert_eq!(poller.observer_count(&key), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_is_classified_and_tracking_continues() {
        let mut response = trip_response(NOW + 3_600);
        response.errors = Some(vec![serde_json::from_value(json!({
            "message": "alerts unavailable",
            "path": ["trip_0", "alerts"]
        }))
        .unwrap()]);
        let harness = Harness::new(false, response);
        let (mut session, mut rx) = harness.session();
        session.select_leg(Some(leg(Some("HSL:1"), "A", "C")));

        assert_eq!(rx.recv().await, Some(TrackingEvent::Loading));
        snapshot(rx.recv().await);
        assert_eq!(
            harness.notifier.messages(),
            vec!["Service alerts could not be loaded for trip 7.".to_string()]
        );
    }
}
