//! Data models for the asset-monitoring pipeline.
//!
//! This module contains the records flowing from the event source through
//! the store, the batch aggregators and the search index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical stream a record belongs to. One aggregator exists per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Telemetry,
    Anomalies,
    Inspections,
}

impl Domain {
    /// All domains in a stable order.
    pub const ALL: [Domain; 3] = [Domain::Telemetry, Domain::Anomalies, Domain::Inspections];

    /// Message topic name for this domain.
    pub fn topic(&self) -> &'static str {
        match self {
            Domain::Telemetry => "asset.telemetry",
            Domain::Anomalies => "asset.anomalies",
            Domain::Inspections => "asset.inspections",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Telemetry => write!(f, "telemetry"),
            Domain::Anomalies => write!(f, "anomalies"),
            Domain::Inspections => write!(f, "inspections"),
        }
    }
}

/// Severity level of an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Drift within tolerance, worth a look
    Low,
    /// Sustained deviation
    Medium,
    /// Equipment at risk
    High,
    /// Immediate intervention required
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

/// State of an asset inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    Scheduled,
    InProgress,
    Passed,
    Failed,
}

impl fmt::Display for InspectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InspectionStatus::Scheduled => write!(f, "Scheduled"),
            InspectionStatus::InProgress => write!(f, "In progress"),
            InspectionStatus::Passed => write!(f, "Passed"),
            InspectionStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Asset the sensor is mounted on.
    pub asset_id: String,
    /// Sensor identifier, unique per asset.
    pub sensor: String,
    /// Measured quantity (e.g. `temperature`, `vibration`).
    pub metric: String,
    /// Measured value.
    pub value: f64,
    /// Unit of `value`, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

/// An anomaly detected on an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Unique anomaly id.
    pub id: String,
    pub asset_id: String,
    /// Detector classification (e.g. `overheat`, `pressure_drop`).
    pub kind: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

/// A change in an inspection's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionUpdate {
    /// Inspection id; later updates replace earlier ones.
    pub id: String,
    pub asset_id: String,
    pub inspector: String,
    pub status: InspectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A record that can travel through a domain pipeline.
pub trait Record: Serialize + Clone + Send + Sync + 'static {
    /// Domain this record type belongs to.
    const DOMAIN: Domain;

    /// Id used for idempotent upserts into the search index.
    fn document_id(&self) -> String;

    fn asset_id(&self) -> &str;

    /// Event time used for ordering and range queries.
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Record for TelemetrySample {
    const DOMAIN: Domain = Domain::Telemetry;

    fn document_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.asset_id,
            self.sensor,
            self.metric,
            self.timestamp.timestamp_millis()
        )
    }

    fn asset_id(&self) -> &str {
        &self.asset_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Record for AnomalyEvent {
    const DOMAIN: Domain = Domain::Anomalies;

    fn document_id(&self) -> String {
        self.id.clone()
    }

    fn asset_id(&self) -> &str {
        &self.asset_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.detected_at
    }
}

impl Record for InspectionUpdate {
    const DOMAIN: Domain = Domain::Inspections;

    fn document_id(&self) -> String {
        self.id.clone()
    }

    fn asset_id(&self) -> &str {
        &self.asset_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// An inbound event as read from the message stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Telemetry(TelemetrySample),
    Anomaly(AnomalyEvent),
    Inspection(InspectionUpdate),
}

impl Event {
    pub fn domain(&self) -> Domain {
        match self {
            Event::Telemetry(_) => Domain::Telemetry,
            Event::Anomaly(_) => Domain::Anomalies,
            Event::Inspection(_) => Domain::Inspections,
        }
    }

    pub fn asset_id(&self) -> &str {
        match self {
            Event::Telemetry(s) => &s.asset_id,
            Event::Anomaly(a) => &a.asset_id,
            Event::Inspection(i) => &i.asset_id,
        }
    }

    /// Check the fields downstream consumers rely on.
    ///
    /// The aggregators never validate, so this runs before an event is
    /// persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.asset_id().trim().is_empty() {
            return Err("asset_id must not be empty".to_string());
        }

        match self {
            Event::Telemetry(s) => {
                if s.sensor.trim().is_empty() {
                    return Err("telemetry sensor must not be empty".to_string());
                }
                if s.metric.trim().is_empty() {
                    return Err("telemetry metric must not be empty".to_string());
                }
                if !s.value.is_finite() {
                    return Err(format!("telemetry value is not finite: {}", s.value));
                }
            }
            Event::Anomaly(a) => {
                if a.id.trim().is_empty() {
                    return Err("anomaly id must not be empty".to_string());
                }
            }
            Event::Inspection(i) => {
                if i.id.trim().is_empty() {
                    return Err("inspection id must not be empty".to_string());
                }
            }
        }

        Ok(())
    }
}

/// Counters collected while ingesting a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Events persisted and handed to an aggregator, per domain.
    pub accepted: std::collections::BTreeMap<Domain, usize>,
    /// Events that failed validation.
    pub rejected: usize,
    /// Lines that could not be parsed as events.
    pub malformed: usize,
    /// `file:line` of the first malformed line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_malformed: Option<String>,
}

impl IngestStats {
    pub fn record_accepted(&mut self, domain: Domain) {
        *self.accepted.entry(domain).or_insert(0) += 1;
    }

    pub fn record_malformed(&mut self, origin: &str, line: usize) {
        self.malformed += 1;
        if self.first_malformed.is_none() {
            self.first_malformed = Some(format!("{}:{}", origin, line));
        }
    }

    pub fn total_accepted(&self) -> usize {
        self.accepted.values().sum()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_event_parses_tagged_json() {
        let line = r#"{"type":"anomaly","id":"an-1","asset_id":"pump-7","kind":"overheat","severity":"high","detected_at":"2024-03-01T10:00:00Z"}"#;
        let event: Event = serde_json::from_str(line).unwrap();

        assert_eq!(event.domain(), Domain::Anomalies);
        assert_eq!(event.asset_id(), "pump-7");
        match event {
            Event::Anomaly(a) => {
                assert_eq!(a.severity, Severity::High);
                assert!(a.description.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_inspection_status_snake_case() {
        let line = r#"{"type":"inspection","id":"in-1","asset_id":"a","inspector":"x","status":"in_progress","updated_at":"2024-03-01T10:00:00Z"}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert!(matches!(
            event,
            Event::Inspection(InspectionUpdate {
                status: InspectionStatus::InProgress,
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_asset() {
        let event = Event::Telemetry(sample("  ", "temperature", 20.0, 0));
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_value() {
        let event = Event::Telemetry(sample("pump-1", "temperature", f64::NAN, 0));
        assert!(event.validate().unwrap_err().contains("not finite"));
        let ok = Event::Telemetry(sample("pump-1", "temperature", 71.5, 0));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_telemetry_document_id_is_stable() {
        let a = sample("pump-1", "temperature", 1.0, 5);
        let b = TelemetrySample { value: 2.0, ..a.clone() };
        assert_eq!(a.document_id(), b.document_id());
        assert_ne!(a.document_id(), sample("pump-1", "temperature", 1.0, 6).document_id());
    }

    #[test]
    fn test_domain_display_and_topic() {
        assert_eq!(Domain::Anomalies.to_string(), "anomalies");
        assert_eq!(Domain::Telemetry.topic(), "asset.telemetry");
        assert_eq!(
            Event::Inspection(inspection("i", "a", InspectionStatus::Passed, 0)).domain(),
            Domain::Inspections
        );
    }

    #[test]
    fn test_ingest_stats_totals() {
        let mut stats = IngestStats::default();
        stats.record_accepted(Domain::Telemetry);
        stats.record_accepted(Domain::Telemetry);
        stats.record_accepted(Domain::Anomalies);
        assert_eq!(stats.total_accepted(), 3);

        stats.record_malformed("day1.jsonl", 7);
        stats.record_malformed("day1.jsonl", 9);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.first_malformed.as_deref(), Some("day1.jsonl:7"));
        assert_eq!(stats.accepted.get(&Domain::Telemetry), Some(&2));
    }
}
