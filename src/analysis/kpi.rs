//! KPI aggregation over indexed documents.
//!
//! This module turns the documents in the search index into the figures the
//! dashboard shows: totals, severity and status breakdowns, per-sensor
//! statistics and the assets with the most anomalies.

use crate::index::{Query, SearchIndex};
use crate::models::{
    AnomalyEvent, Domain, IngestStats, InspectionStatus, InspectionUpdate, Severity,
    TelemetrySample,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Statistics for one (asset, metric) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
    pub asset_id: String,
    pub metric: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Most recent value and when it was taken.
    pub latest: f64,
    pub latest_at: DateTime<Utc>,
}

/// Per-asset document counts and when the asset last reported telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssetActivity {
    pub telemetry: usize,
    pub anomalies: usize,
    pub inspections: usize,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Everything the dashboard report renders.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub generated_at: DateTime<Utc>,
    /// Indexed documents per domain.
    pub totals: BTreeMap<Domain, usize>,
    /// Distinct assets seen in any domain.
    pub asset_count: usize,
    pub assets: BTreeMap<String, AssetActivity>,
    pub anomalies_by_severity: BTreeMap<Severity, usize>,
    /// Current status of each inspection, counted.
    pub inspections_by_status: BTreeMap<InspectionStatus, usize>,
    pub telemetry: Vec<MetricStats>,
    /// Assets ordered by anomaly count, highest first.
    pub most_affected_assets: Vec<(String, usize)>,
    /// Assets whose latest inspection failed.
    pub failed_inspection_assets: Vec<String>,
    pub ingest: IngestStats,
}

impl DashboardSummary {
    /// Total indexed documents.
    pub fn total_documents(&self) -> usize {
        self.totals.values().sum()
    }

    /// Number of anomalies at or above `severity`.
    pub fn anomalies_at_least(&self, severity: Severity) -> usize {
        self.anomalies_by_severity
            .range(severity..)
            .map(|(_, count)| count)
            .sum()
    }
}

/// Build the dashboard summary from the index.
pub fn summarize(index: &SearchIndex, ingest: &IngestStats, top_n: usize) -> DashboardSummary {
    let samples: Vec<TelemetrySample> = load(index, Domain::Telemetry);
    let anomalies: Vec<AnomalyEvent> = load(index, Domain::Anomalies);
    let inspections: Vec<InspectionUpdate> = load(index, Domain::Inspections);

    let totals = Domain::ALL
        .iter()
        .map(|&domain| (domain, index.count(domain)))
        .collect();

    let assets = asset_activity(index);

    DashboardSummary {
        generated_at: Utc::now(),
        totals,
        asset_count: assets.len(),
        assets,
        anomalies_by_severity: severity_distribution(&anomalies),
        inspections_by_status: status_breakdown(&inspections),
        telemetry: metric_stats(&samples),
        most_affected_assets: most_affected_assets(&anomalies, top_n),
        failed_inspection_assets: failed_inspection_assets(&inspections),
        ingest: ingest.clone(),
    }
}

/// Counts per asset across domains, plus the latest telemetry timestamp.
fn asset_activity(index: &SearchIndex) -> BTreeMap<String, AssetActivity> {
    let mut assets: BTreeMap<String, AssetActivity> = BTreeMap::new();

    for domain in Domain::ALL {
        for (asset, count) in index.counts_by_asset(domain) {
            let activity = assets.entry(asset).or_default();
            match domain {
                Domain::Telemetry => activity.telemetry = count,
                Domain::Anomalies => activity.anomalies = count,
                Domain::Inspections => activity.inspections = count,
            }
        }
    }
    for (asset, doc) in index.latest_by_asset(Domain::Telemetry) {
        assets.entry(asset).or_default().last_seen = Some(doc.timestamp);
    }

    assets
}

/// Decode every document of a domain back into its record type.
fn load<R: DeserializeOwned>(index: &SearchIndex, domain: Domain) -> Vec<R> {
    index
        .search(&Query::domain(domain))
        .into_iter()
        .filter_map(|doc| match serde_json::from_value(doc.body) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping undecodable {} document {}: {}", domain, doc.id, e);
                None
            }
        })
        .collect()
}

/// Count anomalies per severity.
pub fn severity_distribution(anomalies: &[AnomalyEvent]) -> BTreeMap<Severity, usize> {
    let mut dist = BTreeMap::new();
    for anomaly in anomalies {
        *dist.entry(anomaly.severity).or_insert(0) += 1;
    }
    dist
}

/// Count inspections per status.
pub fn status_breakdown(inspections: &[InspectionUpdate]) -> BTreeMap<InspectionStatus, usize> {
    let mut breakdown = BTreeMap::new();
    for inspection in inspections {
        *breakdown.entry(inspection.status).or_insert(0) += 1;
    }
    breakdown
}

/// Min/max/mean/latest per (asset, metric), sorted by asset then metric.
pub fn metric_stats(samples: &[TelemetrySample]) -> Vec<MetricStats> {
    let mut grouped: HashMap<(&str, &str), Vec<&TelemetrySample>> = HashMap::new();
    for sample in samples {
        grouped
            .entry((sample.asset_id.as_str(), sample.metric.as_str()))
            .or_default()
            .push(sample);
    }

    let mut stats: Vec<MetricStats> = grouped
        .into_iter()
        .filter_map(|((asset_id, metric), group)| {
            let latest = group.iter().max_by_key(|s| s.timestamp)?;
            let count = group.len();
            let sum: f64 = group.iter().map(|s| s.value).sum();
            let min = group.iter().map(|s| s.value).fold(f64::INFINITY, f64::min);
            let max = group.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max);

            Some(MetricStats {
                asset_id: asset_id.to_string(),
                metric: metric.to_string(),
                count,
                min,
                max,
                mean: sum / count as f64,
                latest: latest.value,
                latest_at: latest.timestamp,
            })
        })
        .collect();

    stats.sort_by(|a, b| (&a.asset_id, &a.metric).cmp(&(&b.asset_id, &b.metric)));
    stats
}

/// The `n` assets with the most anomalies. Ties are broken by asset id.
pub fn most_affected_assets(anomalies: &[AnomalyEvent], n: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for anomaly in anomalies {
        *counts.entry(anomaly.asset_id.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(asset, count)| (asset.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

/// Assets whose most recent inspection update is a failure.
pub fn failed_inspection_assets(inspections: &[InspectionUpdate]) -> Vec<String> {
    let mut latest: HashMap<&str, &InspectionUpdate> = HashMap::new();
    for inspection in inspections {
        let newer = latest
            .get(inspection.asset_id.as_str())
            .map_or(true, |current| inspection.updated_at > current.updated_at);
        if newer {
            latest.insert(inspection.asset_id.as_str(), inspection);
        }
    }

    let mut failed: Vec<String> = latest
        .into_iter()
        .filter(|(_, i)| i.status == InspectionStatus::Failed)
        .map(|(asset, _)| asset.to_string())
        .collect();
    failed.sort();
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;

    #[test]
    fn test_severity_distribution() {
        let anomalies = vec![
            anomaly("a1", "pump-1", Severity::High, 0),
            anomaly("a2", "pump-1", Severity::High, 1),
            anomaly("a3", "fan-2", Severity::Critical, 2),
        ];
        let dist = severity_distribution(&anomalies);
        assert_eq!(dist.get(&Severity::High), Some(&2));
        assert_eq!(dist.get(&Severity::Critical), Some(&1));
        assert_eq!(dist.get(&Severity::Low), None);
    }

    #[test]
    fn test_metric_stats() {
        let samples = vec![
            sample("pump-1", "temperature", 70.0, 0),
            sample("pump-1", "temperature", 80.0, 2),
            sample("pump-1", "temperature", 75.0, 1),
            sample("pump-1", "pressure", 3.5, 0),
        ];
        let stats = metric_stats(&samples);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].metric, "pressure");
        let temp = &stats[1];
        assert_eq!(temp.count, 3);
        assert_eq!(temp.min, 70.0);
        assert_eq!(temp.max, 80.0);
        assert_eq!(temp.mean, 75.0);
        assert_eq!(temp.latest, 80.0);
        assert_eq!(temp.latest_at, at(2));
    }

    #[test]
    fn test_most_affected_assets() {
        let anomalies = vec![
            anomaly("a1", "pump-1", Severity::Low, 0),
            anomaly("a2", "fan-2", Severity::Low, 0),
            anomaly("a3", "fan-2", Severity::Low, 0),
            anomaly("a4", "belt-9", Severity::Low, 0),
        ];
        let top = most_affected_assets(&anomalies, 2);
        assert_eq!(
            top,
            vec![("fan-2".to_string(), 2), ("belt-9".to_string(), 1)]
        );
    }

    #[test]
    fn test_failed_inspection_assets_uses_latest_update() {
        let inspections = vec![
            inspection("i1", "valve-1", InspectionStatus::Failed, 0),
            inspection("i2", "valve-1", InspectionStatus::Passed, 10),
            inspection("i3", "valve-2", InspectionStatus::Failed, 5),
        ];
        assert_eq!(failed_inspection_assets(&inspections), vec!["valve-2"]);
    }

    #[test]
    fn test_summarize_from_index() {
        let index = SearchIndex::new(100);
        index
            .bulk_index(&[
                sample("pump-1", "temperature", 70.0, 0),
                sample("fan-2", "vibration", 0.3, 0),
            ])
            .unwrap();
        index
            .bulk_index(&[
                anomaly("a1", "pump-1", Severity::Critical, 1),
                anomaly("a2", "pump-1", Severity::Medium, 2),
            ])
            .unwrap();
        index
            .bulk_index(&[inspection("i1", "tank-3", InspectionStatus::Scheduled, 0)])
            .unwrap();

        let summary = summarize(&index, &IngestStats::default(), 5);
        assert_eq!(summary.total_documents(), 5);
        assert_eq!(summary.totals[&Domain::Anomalies], 2);
        assert_eq!(summary.asset_count, 3);
        assert_eq!(summary.anomalies_at_least(Severity::High), 1);
        assert_eq!(summary.anomalies_at_least(Severity::Medium), 2);
        assert_eq!(summary.inspections_by_status[&InspectionStatus::Scheduled], 1);
        assert_eq!(summary.most_affected_assets[0], ("pump-1".to_string(), 2));
        assert_eq!(summary.telemetry.len(), 2);

        let pump = &summary.assets["pump-1"];
        assert_eq!(pump.telemetry, 1);
        assert_eq!(pump.anomalies, 2);
        assert_eq!(pump.last_seen, Some(at(0)));
        assert_eq!(summary.assets["tank-3"].last_seen, None);
    }
}
