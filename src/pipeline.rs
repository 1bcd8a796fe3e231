//! Ingest pipeline.
//!
//! Wires the three domain streams: every event is validated, persisted to the
//! primary store and then handed to its domain's [`BatchAggregator`], whose
//! [`DomainSink`] broadcasts the batch and bulk-writes it to the index.

use crate::batch::{BatchAggregator, BatchSink, SinkFuture};
use crate::broadcast::{Broadcaster, LiveUpdate};
use crate::config::Config;
use crate::index::SearchIndex;
use crate::models::{AnomalyEvent, Domain, Event, IngestStats, InspectionUpdate, Record, TelemetrySample};
use crate::store::EventStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flush target shared by all domains: live broadcast, then bulk index.
///
/// Both steps are best-effort. A broadcast never fails; an index failure
/// is returned so the aggregator logs it. The primary store already holds
/// the records either way.
#[derive(Clone)]
pub struct DomainSink {
    index: Arc<SearchIndex>,
    broadcaster: Broadcaster,
}

impl DomainSink {
    pub fn new(index: Arc<SearchIndex>, broadcaster: Broadcaster) -> Self {
        Self { index, broadcaster }
    }
}

impl<R: Record> BatchSink<R> for DomainSink {
    fn deliver(&self, batch: Vec<R>) -> SinkFuture {
        let index = Arc::clone(&self.index);
        let broadcaster = self.broadcaster.clone();

        Box::pin(async move {
            match LiveUpdate::from_batch(&batch) {
                Ok(update) => {
                    let receivers = broadcaster.publish(update);
                    debug!("Broadcast {} {} records to {} subscribers", batch.len(), R::DOMAIN, receivers);
                }
                Err(e) => warn!("Skipping live update: {:#}", e),
            }

            let response = index
                .bulk_index(&batch)
                .with_context(|| format!("Bulk index of {} {} records failed", batch.len(), R::DOMAIN))?;
            debug!(
                "Indexed {} batch: {} created, {} updated",
                R::DOMAIN,
                response.created,
                response.updated
            );
            anyhow::Ok(())
        })
    }
}

/// Owns the primary store and one aggregator per domain.
pub struct Pipeline {
    store: Arc<EventStore>,
    telemetry: BatchAggregator<TelemetrySample>,
    anomalies: BatchAggregator<AnomalyEvent>,
    inspections: BatchAggregator<InspectionUpdate>,
    stats: IngestStats,
}

impl Pipeline {
    /// Build the three aggregators. Must be called inside a tokio runtime.
    pub fn new(config: &Config, store: Arc<EventStore>, sink: DomainSink) -> Result<Self> {
        let batching = &config.batching;
        let batch_config = |domain: Domain| batching.for_domain(domain).to_batch_config();

        let telemetry = BatchAggregator::new(
            Domain::Telemetry.topic(),
            batch_config(Domain::Telemetry),
            sink.clone(),
        )?;
        let anomalies = BatchAggregator::new(
            Domain::Anomalies.topic(),
            batch_config(Domain::Anomalies),
            sink.clone(),
        )?;
        let inspections = BatchAggregator::new(
            Domain::Inspections.topic(),
            batch_config(Domain::Inspections),
            sink,
        )?;

        log_thresholds(&telemetry);
        log_thresholds(&anomalies);
        log_thresholds(&inspections);

        Ok(Self {
            store,
            telemetry,
            anomalies,
            inspections,
            stats: IngestStats::default(),
        })
    }

    /// Validate, persist, then buffer one event.
    ///
    /// Invalid events are counted and dropped (`Ok(false)`). A store failure
    /// is an error: the event never reaches an aggregator.
    pub fn ingest(&mut self, event: Event) -> Result<bool> {
        if let Err(reason) = event.validate() {
            warn!("Rejected {} event for asset '{}': {}", event.domain(), event.asset_id(), reason);
            self.stats.rejected += 1;
            return Ok(false);
        }

        self.store.append(&event)?;
        self.stats.record_accepted(event.domain());

        match event {
            Event::Telemetry(sample) => self.telemetry.add(sample),
            Event::Anomaly(anomaly) => self.anomalies.add(anomaly),
            Event::Inspection(update) => self.inspections.add(update),
        }
        Ok(true)
    }

    /// Count a line the source could not parse.
    pub fn record_malformed(&mut self, origin: &str, line: usize) {
        self.stats.record_malformed(origin, line);
    }

    /// Records buffered across all domains.
    pub fn pending(&self) -> usize {
        self.telemetry.pending() + self.anomalies.pending() + self.inspections.pending()
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Final flush of every domain, waiting for in-flight sink work.
    pub async fn shutdown(self) -> IngestStats {
        info!("Flushing {} buffered records", self.pending());
        tokio::join!(
            self.telemetry.shutdown(),
            self.anomalies.shutdown(),
            self.inspections.shutdown()
        );
        self.stats
    }
}

fn log_thresholds<T: Send + 'static>(aggregator: &BatchAggregator<T>) {
    let config = aggregator.config();
    info!(
        "{}: flush at {} records or {}ms",
        aggregator.name(),
        config.max_size,
        config.max_time.as_millis()
    );
}
