//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use quality_control::domain::models::{
    DataHeader, DataRef, Histogram1D, InputRecord, MonitorObject, TaskConfig,
};
use quality_control::domain::ports::{
    Database, MonitorObjectSink, PublishedCycle, ServiceRegistry, TaskInterface,
};
use quality_control::infrastructure::clock::ManualClock;
use quality_control::infrastructure::database::InMemoryDatabase;
use quality_control::services::TaskRunner;
use quality_control::QcError;

/// Create a temporary directory for test isolation
///
/// Returns a TempDir that will be cleaned up when dropped.
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Create a temporary object store file
///
/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let db_path = dir.path().join("qc.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Clock, in-memory store and the service registry built on them
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub database: Arc<InMemoryDatabase>,
    pub services: ServiceRegistry,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let database = Arc::new(InMemoryDatabase::new());
        let services = ServiceRegistry::new(database.clone(), clock.clone());
        Self {
            clock,
            database,
            services,
        }
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.database.clone()
    }

    /// Task runner for `task` publishing under detector "TST"
    pub fn task_runner(
        &self,
        name: &str,
        task: Box<dyn TaskInterface>,
        sink: Arc<dyn MonitorObjectSink>,
    ) -> TaskRunner {
        TaskRunner::new(
            name,
            TaskConfig::new("Test", "TST"),
            task,
            self.services.clone(),
            sink,
        )
    }
}

/// Sink that keeps every publication for inspection
#[derive(Default)]
pub struct RecordingSink {
    pub cycles: Mutex<Vec<PublishedCycle>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<PublishedCycle> {
        self.cycles.lock().unwrap().clone()
    }

    pub fn object(&self, cycle: usize, name: &str) -> Option<MonitorObject> {
        self.cycles
            .lock()
            .unwrap()
            .get(cycle)?
            .objects
            .iter()
            .find(|mo| mo.name() == name)
            .cloned()
    }
}

#[async_trait]
impl MonitorObjectSink for RecordingSink {
    async fn publish(&self, cycle: PublishedCycle) -> Result<(), QcError> {
        self.cycles.lock().unwrap().push(cycle);
        Ok(())
    }
}

/// A message carrying one binding with an empty payload
pub fn message(binding: &str) -> InputRecord {
    InputRecord::new().with(binding, DataRef::new(DataHeader::default(), vec![]))
}

/// A 1D histogram whose first bins hold `contents`
pub fn histogram(name: &str, bins: usize, contents: &[f64]) -> Histogram1D {
    let mut h = Histogram1D::new(name, bins, 0.0, bins as f64);
    for (bin, content) in contents.iter().enumerate() {
        h.set_bin_content(bin + 1, *content);
    }
    h
}
