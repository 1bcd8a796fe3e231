//! Markdown report generation.
//!
//! This module renders the dashboard KPI summary as a Markdown document or
//! as pretty-printed JSON.

use crate::analysis::{AssetActivity, DashboardSummary, MetricStats};
use crate::models::{Domain, InspectionStatus, IngestStats, Severity};
use anyhow::Result;
use std::collections::BTreeMap;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(summary: &DashboardSummary) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Plantwatch Dashboard Report\n\n");

    output.push_str(&generate_metadata_section(summary));
    output.push_str(&generate_ingest_section(&summary.ingest));
    output.push_str(&generate_assets_section(&summary.assets));
    output.push_str(&generate_anomaly_section(summary));
    output.push_str(&generate_inspection_section(summary));
    output.push_str(&generate_telemetry_section(&summary.telemetry));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(summary: &DashboardSummary) -> String {
    let mut section = String::new();

    section.push_str("## Overview\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Assets:** {}\n", summary.asset_count));
    section.push_str(&format!(
        "- **Indexed Documents:** {}\n",
        summary.total_documents()
    ));
    for domain in Domain::ALL {
        let count = summary.totals.get(&domain).copied().unwrap_or(0);
        section.push_str(&format!("  - {}: {}\n", domain, count));
    }
    section.push_str("\n");

    section
}

/// Generate the ingest counters section.
fn generate_ingest_section(stats: &IngestStats) -> String {
    let mut section = String::new();

    section.push_str("## Ingest\n\n");
    section.push_str("| Domain | Accepted |\n");
    section.push_str("|:---|:---:|\n");
    for domain in Domain::ALL {
        let count = stats.accepted.get(&domain).copied().unwrap_or(0);
        section.push_str(&format!("| {} | {} |\n", domain, count));
    }
    section.push_str(&format!("| **Total** | **{}** |\n\n", stats.total_accepted()));

    if stats.rejected > 0 || stats.malformed > 0 {
        section.push_str(&format!(
            "⚠️ {} events rejected by validation, {} malformed lines skipped.\n\n",
            stats.rejected, stats.malformed
        ));
        if let Some(ref first) = stats.first_malformed {
            section.push_str(&format!("First malformed line: `{}`\n\n", first));
        }
    }

    section
}

/// Generate the per-asset activity table.
fn generate_assets_section(assets: &BTreeMap<String, AssetActivity>) -> String {
    if assets.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Assets\n\n");
    section.push_str("| Asset | Telemetry | Anomalies | Inspections | Last Seen |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---|\n");
    for (asset, activity) in assets {
        let last_seen = activity
            .last_seen
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            asset, activity.telemetry, activity.anomalies, activity.inspections, last_seen
        ));
    }
    section.push_str("\n");

    section
}

/// Generate the anomaly section.
fn generate_anomaly_section(summary: &DashboardSummary) -> String {
    let mut section = String::new();

    section.push_str("## Anomalies\n\n");

    let count = |severity: Severity| {
        summary
            .anomalies_by_severity
            .get(&severity)
            .copied()
            .unwrap_or(0)
    };
    section.push_str(&format!(
        "| {} Critical | {} High | {} Medium | {} Low | **Total** |\n",
        Severity::Critical.emoji(),
        Severity::High.emoji(),
        Severity::Medium.emoji(),
        Severity::Low.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | **{}** |\n\n",
        count(Severity::Critical),
        count(Severity::High),
        count(Severity::Medium),
        count(Severity::Low),
        summary.anomalies_at_least(Severity::Low)
    ));

    if !summary.most_affected_assets.is_empty() {
        section.push_str("### Most Affected Assets\n\n");
        section.push_str("| Asset | Anomalies |\n");
        section.push_str("|:---|:---:|\n");

        for (asset, count) in &summary.most_affected_assets {
            section.push_str(&format!("| `{}` | {} |\n", asset, count));
        }
        section.push_str("\n");
    }

    section
}

/// Generate the inspection section.
fn generate_inspection_section(summary: &DashboardSummary) -> String {
    let mut section = String::new();

    section.push_str("## Inspections\n\n");

    if summary.inspections_by_status.is_empty() {
        section.push_str("No inspection updates were received.\n\n");
        return section;
    }

    section.push_str("| Status | Count |\n");
    section.push_str("|:---|:---:|\n");
    for (status, count) in &summary.inspections_by_status {
        let marker = match status {
            InspectionStatus::Failed => " ❌",
            InspectionStatus::Passed => " ✅",
            _ => "",
        };
        section.push_str(&format!("| {}{} | {} |\n", status, marker, count));
    }
    section.push_str("\n");

    if !summary.failed_inspection_assets.is_empty() {
        section.push_str("**Assets with a failed latest inspection:** ");
        let assets: Vec<String> = summary
            .failed_inspection_assets
            .iter()
            .map(|a| format!("`{}`", a))
            .collect();
        section.push_str(&assets.join(", "));
        section.push_str("\n\n");
    }

    section
}

/// Generate the telemetry statistics section.
fn generate_telemetry_section(stats: &[MetricStats]) -> String {
    let mut section = String::new();

    section.push_str("## Telemetry\n\n");

    if stats.is_empty() {
        section.push_str("No telemetry samples were received.\n\n");
        return section;
    }

    section.push_str("| Asset | Metric | Samples | Min | Max | Mean | Latest |\n");
    section.push_str("|:---|:---|:---:|---:|---:|---:|---:|\n");
    for s in stats {
        section.push_str(&format!(
            "| `{}` | {} | {} | {:.2} | {:.2} | {:.2} | {:.2} |\n",
            s.asset_id, s.metric, s.count, s.min, s.max, s.mean, s.latest
        ));
    }
    section.push_str("\n");

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by Plantwatch v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(summary: &DashboardSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_summary() -> DashboardSummary {
        let mut ingest = IngestStats::default();
        ingest.record_accepted(Domain::Telemetry);
        ingest.record_accepted(Domain::Anomalies);
        ingest.record_malformed("plant-a.jsonl", 12);

        DashboardSummary {
            generated_at: Utc::now(),
            totals: [(Domain::Telemetry, 1), (Domain::Anomalies, 1)]
                .into_iter()
                .collect(),
            asset_count: 1,
            assets: [(
                "pump-1".to_string(),
                AssetActivity {
                    telemetry: 1,
                    anomalies: 1,
                    inspections: 0,
                    last_seen: None,
                },
            )]
            .into_iter()
            .collect(),
            anomalies_by_severity: [(Severity::Critical, 1)].into_iter().collect(),
            inspections_by_status: BTreeMap::new(),
            telemetry: vec![MetricStats {
                asset_id: "pump-1".to_string(),
                metric: "temperature".to_string(),
                count: 1,
                min: 71.5,
                max: 71.5,
                mean: 71.5,
                latest: 71.5,
                latest_at: Utc::now(),
            }],
            most_affected_assets: vec![("pump-1".to_string(), 1)],
            failed_inspection_assets: Vec::new(),
            ingest,
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let summary = create_test_summary();
        let markdown = generate_markdown_report(&summary);

        assert!(markdown.contains("# Plantwatch Dashboard Report"));
        assert!(markdown.contains("## Anomalies"));
        assert!(markdown.contains("| `pump-1` | temperature | 1 | 71.50"));
        assert!(markdown.contains("No inspection updates were received."));
        assert!(markdown.contains("1 malformed lines skipped"));
        assert!(markdown.contains("First malformed line: `plant-a.jsonl:12`"));
        assert!(markdown.contains("| `pump-1` | 1 | 1 | 0 | - |"));
    }

    #[test]
    fn test_generate_inspection_section_lists_failures() {
        let mut summary = create_test_summary();
        summary
            .inspections_by_status
            .insert(InspectionStatus::Failed, 2);
        summary.failed_inspection_assets = vec!["valve-1".to_string(), "valve-7".to_string()];

        let section = generate_inspection_section(&summary);
        assert!(section.contains("| Failed ❌ | 2 |"));
        assert!(section.contains("`valve-1`, `valve-7`"));
    }

    #[test]
    fn test_generate_json_report() {
        let summary = create_test_summary();
        let json = generate_json_report(&summary).unwrap();

        assert!(json.contains("\"anomalies_by_severity\""));
        assert!(json.contains("\"critical\": 1"));
        assert!(json.contains("\"most_affected_assets\""));
    }
}
