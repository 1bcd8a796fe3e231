//! In-memory search index.
//!
//! Holds the documents the dashboard queries: bulk upserts come from the
//! domain sinks, reads come from the KPI analysis and the report.

use crate::models::{Domain, Record};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors returned by bulk writes.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index refused documents because it is full.
    #[error("index capacity of {capacity} documents exceeded; {rejected} of {attempted} documents rejected")]
    CapacityExceeded {
        capacity: usize,
        attempted: usize,
        rejected: usize,
    },

    #[error("failed to serialize document {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One indexed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub domain: Domain,
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    /// The record as JSON.
    pub body: Value,
}

/// Outcome of a successful bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkResponse {
    /// Documents newly added.
    pub created: usize,
    /// Documents that replaced an existing id.
    pub updated: usize,
}

/// Filter and pagination for [`SearchIndex::search`].
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub domain: Option<Domain>,
    pub asset_id: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub offset: usize,
    /// `None` returns everything after `offset`.
    pub limit: Option<usize>,
}

impl Query {
    pub fn domain(domain: Domain) -> Self {
        Self {
            domain: Some(domain),
            ..Self::default()
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        self.domain.map_or(true, |d| d == doc.domain)
            && self.asset_id.as_deref().map_or(true, |a| a == doc.asset_id)
            && self.from.map_or(true, |from| doc.timestamp >= from)
            && self.to.map_or(true, |to| doc.timestamp < to)
    }
}

#[derive(Default)]
struct Indices {
    by_domain: HashMap<Domain, HashMap<String, Document>>,
    total: usize,
}

/// Thread-safe document index keyed by domain and document id.
pub struct SearchIndex {
    max_documents: usize,
    inner: RwLock<Indices>,
}

impl SearchIndex {
    pub fn new(max_documents: usize) -> Self {
        Self {
            max_documents,
            inner: RwLock::new(Indices::default()),
        }
    }

    /// Upsert a batch of records.
    ///
    /// Documents are applied in order; once the index is full, new ids are
    /// rejected while updates to existing ids still succeed. Any rejection
    /// is reported as [`IndexError::CapacityExceeded`] after the accepted
    /// documents have been written.
    pub fn bulk_index<R: Record>(&self, batch: &[R]) -> Result<BulkResponse, IndexError> {
        let mut docs = Vec::with_capacity(batch.len());
        for record in batch {
            let id = record.document_id();
            let body = serde_json::to_value(record).map_err(|source| IndexError::Serialize {
                id: id.clone(),
                source,
            })?;
            docs.push(Document {
                id,
                domain: R::DOMAIN,
                asset_id: record.asset_id().to_string(),
                timestamp: record.timestamp(),
                body,
            });
        }

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let indices = &mut *guard;
        let domain_docs = indices.by_domain.entry(R::DOMAIN).or_default();

        let mut response = BulkResponse::default();
        let mut rejected = 0;
        for doc in docs {
            if domain_docs.contains_key(&doc.id) {
                domain_docs.insert(doc.id.clone(), doc);
                response.updated += 1;
            } else if indices.total < self.max_documents {
                domain_docs.insert(doc.id.clone(), doc);
                indices.total += 1;
                response.created += 1;
            } else {
                rejected += 1;
            }
        }

        if rejected > 0 {
            return Err(IndexError::CapacityExceeded {
                capacity: self.max_documents,
                attempted: batch.len(),
                rejected,
            });
        }
        Ok(response)
    }

    /// Total documents across all domains.
    pub fn len(&self) -> usize {
        self.read(|i| i.total)
    }

    pub fn count(&self, domain: Domain) -> usize {
        self.read(|i| i.by_domain.get(&domain).map_or(0, HashMap::len))
    }

    /// Document count per asset for a domain.
    pub fn counts_by_asset(&self, domain: Domain) -> BTreeMap<String, usize> {
        self.read(|i| {
            let mut counts = BTreeMap::new();
            if let Some(docs) = i.by_domain.get(&domain) {
                for doc in docs.values() {
                    *counts.entry(doc.asset_id.clone()).or_insert(0) += 1;
                }
            }
            counts
        })
    }

    /// Most recent document per asset for a domain.
    pub fn latest_by_asset(&self, domain: Domain) -> BTreeMap<String, Document> {
        self.read(|i| {
            let mut latest: BTreeMap<String, Document> = BTreeMap::new();
            if let Some(docs) = i.by_domain.get(&domain) {
                for doc in docs.values() {
                    let newer = latest
                        .get(&doc.asset_id)
                        .map_or(true, |current| doc.timestamp > current.timestamp);
                    if newer {
                        latest.insert(doc.asset_id.clone(), doc.clone());
                    }
                }
            }
            latest
        })
    }

    /// Matching documents, newest first, paginated.
    pub fn search(&self, query: &Query) -> Vec<Document> {
        let mut hits: Vec<Document> = self.read(|i| {
            i.by_domain
                .iter()
                .filter(|(domain, _)| query.domain.map_or(true, |d| d == **domain))
                .flat_map(|(_, docs)| docs.values())
                .filter(|doc| query.matches(doc))
                .cloned()
                .collect()
        });

        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        let limit = query.limit.unwrap_or(usize::MAX);
        hits.into_iter().skip(query.offset).take(limit).collect()
    }

    fn read<F, O>(&self, f: F) -> O
    where
        F: FnOnce(&Indices) -> O,
    {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{InspectionStatus, Severity, TelemetrySample};

    #[test]
    fn test_bulk_index_creates_and_counts() {
        let index = SearchIndex::new(100);
        let batch = vec![
            sample("pump-1", "temperature", 70.0, 0),
            sample("pump-1", "temperature", 71.0, 1),
            sample("fan-3", "vibration", 0.4, 1),
        ];

        let response = index.bulk_index(&batch).unwrap();
        assert_eq!(response, BulkResponse { created: 3, updated: 0 });
        assert_eq!(index.len(), 3);
        assert_eq!(index.count(Domain::Telemetry), 3);
        assert_eq!(index.count(Domain::Anomalies), 0);

        let by_asset = index.counts_by_asset(Domain::Telemetry);
        assert_eq!(by_asset.get("pump-1"), Some(&2));
        assert_eq!(by_asset.get("fan-3"), Some(&1));
    }

    #[test]
    fn test_bulk_index_upserts_by_id() {
        let index = SearchIndex::new(100);
        index
            .bulk_index(&[inspection("in-1", "valve-2", InspectionStatus::Scheduled, 0)])
            .unwrap();
        let response = index
            .bulk_index(&[inspection("in-1", "valve-2", InspectionStatus::Failed, 30)])
            .unwrap();

        assert_eq!(response, BulkResponse { created: 0, updated: 1 });
        assert_eq!(index.count(Domain::Inspections), 1);
        let latest = index.latest_by_asset(Domain::Inspections);
        assert_eq!(latest["valve-2"].body["status"], "failed");
    }

    #[test]
    fn test_capacity_rejects_overflow_but_keeps_accepted() {
        let index = SearchIndex::new(2);
        let batch = vec![
            anomaly("an-1", "pump-1", Severity::Low, 0),
            anomaly("an-2", "pump-1", Severity::High, 1),
            anomaly("an-3", "pump-2", Severity::Critical, 2),
        ];

        let err = index.bulk_index(&batch).unwrap_err();
        assert!(matches!(
            err,
            IndexError::CapacityExceeded {
                capacity: 2,
                attempted: 3,
                rejected: 1
            }
        ));
        assert_eq!(index.count(Domain::Anomalies), 2);

        // Updates to existing ids still go through when full.
        let response = index
            .bulk_index(&[anomaly("an-1", "pump-1", Severity::Medium, 5)])
            .unwrap();
        assert_eq!(response.updated, 1);
    }

    #[test]
    fn test_latest_by_asset() {
        let index = SearchIndex::new(100);
        index
            .bulk_index(&[
                sample("pump-1", "temperature", 70.0, 10),
                sample("pump-1", "temperature", 75.0, 20),
                sample("pump-1", "temperature", 72.0, 15),
            ])
            .unwrap();

        let latest = index.latest_by_asset(Domain::Telemetry);
        assert_eq!(latest["pump-1"].body["value"], 75.0);
    }

    #[test]
    fn test_search_filters_and_paginates() {
        let index = SearchIndex::new(100);
        let batch: Vec<_> = (0..10)
            .map(|i| sample(if i % 2 == 0 { "pump-1" } else { "fan-3" }, "temperature", i as f64, i))
            .collect();
        index.bulk_index(&batch).unwrap();

        let pump = index.search(&Query {
            asset_id: Some("pump-1".to_string()),
            ..Query::domain(Domain::Telemetry)
        });
        assert_eq!(pump.len(), 5);
        assert_eq!(pump[0].timestamp, at(8));

        let window = index.search(&Query {
            from: Some(at(2)),
            to: Some(at(6)),
            ..Query::default()
        });
        assert_eq!(window.len(), 4);
        assert!(window.iter().all(|d| d.timestamp >= at(2) && d.timestamp < at(6)));

        let page = index.search(&Query {
            offset: 3,
            limit: Some(2),
            ..Query::domain(Domain::Telemetry)
        });
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].timestamp, at(6));
        assert_eq!(page[1].timestamp, at(5));

        assert!(index.search(&Query::domain(Domain::Anomalies)).is_empty());
    }

    #[test]
    fn test_sensor_metrics_at_same_instant_are_separate_documents() {
        let index = SearchIndex::new(100);
        let temperature = TelemetrySample {
            sensor: "env-1".to_string(),
            ..sample("pump-1", "temperature", 71.5, 0)
        };
        let humidity = TelemetrySample {
            sensor: "env-1".to_string(),
            ..sample("pump-1", "humidity", 40.0, 0)
        };

        let response = index.bulk_index(&[temperature, humidity]).unwrap();
        assert_eq!(response, BulkResponse { created: 2, updated: 0 });
        assert_eq!(index.count(Domain::Telemetry), 2);
    }
}
