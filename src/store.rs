//! Durable primary store.
//!
//! Every accepted event is appended to a per-domain JSON Lines file before it
//! reaches an aggregator, so the search index and live broadcast can always
//! be rebuilt from here.

use crate::models::{Domain, Event};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Append-only event log, one file per domain.
pub struct EventStore {
    root: PathBuf,
    sync_writes: bool,
    files: HashMap<Domain, Mutex<File>>,
}

impl EventStore {
    /// Open (creating if needed) the store under `root`.
    pub fn open(root: impl Into<PathBuf>, sync_writes: bool) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create data directory: {}", root.display()))?;

        let mut files = HashMap::new();
        for domain in Domain::ALL {
            let path = Self::path_for(&root, domain);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open event log: {}", path.display()))?;
            files.insert(domain, Mutex::new(file));
        }

        info!("Event store at: {}", root.display());
        Ok(Self {
            root,
            sync_writes,
            files,
        })
    }

    fn path_for(root: &Path, domain: Domain) -> PathBuf {
        root.join(format!("{}.jsonl", domain))
    }

    /// Location of a domain's log file.
    pub fn log_path(&self, domain: Domain) -> PathBuf {
        Self::path_for(&self.root, domain)
    }

    /// Persist one event. Returns once the line has been written (and synced
    /// when `sync_writes` is set).
    pub fn append(&self, event: &Event) -> Result<()> {
        let domain = event.domain();
        let mut line = serde_json::to_vec(event).context("Failed to serialize event")?;
        line.push(b'\n');

        let file = self
            .files
            .get(&domain)
            .with_context(|| format!("No event log for domain {}", domain))?;
        let mut file = file
            .lock()
            .map_err(|_| anyhow::anyhow!("Event log lock poisoned for domain {}", domain))?;

        file.write_all(&line)
            .with_context(|| format!("Failed to append to {} log", domain))?;
        if self.sync_writes {
            file.sync_data()
                .with_context(|| format!("Failed to sync {} log", domain))?;
        }

        debug!("Persisted {} event for asset {}", domain, event.asset_id());
        Ok(())
    }

    /// Read back every event of a domain in append order.
    #[allow(dead_code)]
    pub fn load(&self, domain: Domain) -> Result<Vec<Event>> {
        let path = self.log_path(domain);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open event log: {}", path.display()))?;

        let mut events = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line).with_context(|| {
                format!("Corrupt record at {}:{}", path.display(), idx + 1)
            })?;
            events.push(event);
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{InspectionStatus, Severity};
    use tempfile::TempDir;

    #[test]
    fn test_append_and_load_per_domain() {
        let dir = TempDir::new().unwrap();
        let store = EventStore::open(dir.path(), false).unwrap();

        let t1 = Event::Telemetry(sample("pump-1", "temperature", 70.0, 0));
        let t2 = Event::Telemetry(sample("pump-1", "temperature", 71.0, 1));
        let a1 = Event::Anomaly(anomaly("an-1", "pump-1", Severity::High, 2));

        store.append(&t1).unwrap();
        store.append(&a1).unwrap();
        store.append(&t2).unwrap();

        assert_eq!(store.load(Domain::Telemetry).unwrap(), vec![t1, t2]);
        assert_eq!(store.load(Domain::Anomalies).unwrap(), vec![a1]);
        assert!(store.load(Domain::Inspections).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let first = Event::Inspection(inspection("in-1", "valve-2", InspectionStatus::Scheduled, 0));
        let second = Event::Inspection(inspection("in-1", "valve-2", InspectionStatus::Passed, 60));

        {
            let store = EventStore::open(dir.path(), true).unwrap();
            store.append(&first).unwrap();
        }
        let store = EventStore::open(dir.path(), true).unwrap();
        store.append(&second).unwrap();

        assert_eq!(store.load(Domain::Inspections).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_load_reports_corrupt_line() {
        let dir = TempDir::new().unwrap();
        let store = EventStore::open(dir.path(), false).unwrap();
        fs::write(store.log_path(Domain::Anomalies), "{not json}\n").unwrap();

        let err = store.load(Domain::Anomalies).unwrap_err();
        assert!(format!("{:#}", err).contains("anomalies.jsonl:1"));
    }
}
