//! Shared helpers for integration tests.
#![allow(dead_code)]

use enhancement_tracker::Tracker;
use enhancement_tracker::config::TrackerSettings;
use tempfile::TempDir;

/// A file-backed store in a temp dir. Several handles may open it at once,
/// the way separate worker processes would.
pub struct TestStore {
    pub dir: TempDir,
    pub url: String,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let url = format!("sqlite://{}", dir.path().join("tracker.db").display());
        Self { dir, url }
    }

    pub async fn open(&self) -> Tracker {
        self.open_with(settings()).await
    }

    pub async fn open_with(&self, settings: TrackerSettings) -> Tracker {
        Tracker::open(&self.url, settings)
            .await
            .expect("failed to open tracker")
    }
}

pub fn settings() -> TrackerSettings {
    TrackerSettings {
        busy_timeout_secs: 10,
        ..TrackerSettings::default()
    }
}

pub async fn memory_tracker() -> Tracker {
    Tracker::in_memory(settings())
        .await
        .expect("failed to create in-memory tracker")
}
