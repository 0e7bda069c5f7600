// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Observable application settings consumed by the tracking core.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub poll_interval: Duration,
    pub auto_update: bool,
    pub delay_threshold_secs: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
            auto_update: true,
            delay_threshold_secs: crate::config::DEFAULT_DELAY_THRESHOLD_SECS,
        }
    }
}

/// Owner side of the settings channel. Readers get a `watch::Receiver<Settings>`
/// which also serves as the polling engine's interval source.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Settings>>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Settings {
        *self.tx.borrow()
    }

    /// A zero interval is ignored.
    pub fn set_poll_interval(&self, interval: Duration) {
        if interval.is_zero() {
            tracing::warn!("Ignoring zero poll interval");
            return;
        }
        self.tx.send_if_modified(|settings| {
            if settings.poll_interval == interval {
                return false;
            }
            settings.poll_interval = interval;
            true
        });
    }

    pub fn set_auto_update(&self, auto_update: bool) {
        self.tx.send_if_modified(|settings| {
            if settings.auto_update == auto_update {
                return false;
            }
            settings.auto_update = auto_update;
            true
        });
    }

    pub fn set_delay_threshold(&self, threshold_secs: i64) {
        self.tx.send_if_modified(|settings| {
            if settings.delay_threshold_secs == threshold_secs {
                return false;
            }
            settings.delay_threshold_secs = threshold_secs;
            true
        });
    }
}
