use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::store::Stores;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSummary {
    pub predictions_discarded: u64,
    pub snapshots_pruned: u64,
}

/// Drops predictions that can no longer be reconciled and telemetry past retention.
pub struct RetentionService {
    stores: Stores,
    interval: Duration,
    prediction_max_age_days: i64,
    telemetry_retention_days: i64,
}

impl RetentionService {
    pub fn new(
        stores: Stores,
        interval: Duration,
        prediction_max_age_days: i64,
        telemetry_retention_days: i64,
    ) -> Self {
        Self {
            stores,
            interval,
            prediction_max_age_days: prediction_max_age_days.max(1),
            telemetry_retention_days: telemetry_retention_days.max(1),
        }
    }

    pub fn start(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.tick_once(Utc::now()).await {
                            tracing::warn!("retention tick failed: {err:#}");
                        }
                    }
                }
            }
        });
    }

    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<RetentionSummary> {
        let prediction_cutoff = now - ChronoDuration::days(self.prediction_max_age_days);
        let predictions_discarded = self
            .stores
            .predictions
            .discard_unreconciled_before(prediction_cutoff)
            .await
            .context("failed to discard stale predictions")?;

        let telemetry_cutoff = now - ChronoDuration::days(self.telemetry_retention_days);
        let snapshots_pruned = self
            .stores
            .telemetry
            .prune_snapshots_before(telemetry_cutoff)
            .await
            .context("failed to prune telemetry")?;

        if predictions_discarded > 0 || snapshots_pruned > 0 {
            tracing::info!(predictions_discarded, snapshots_pruned, "retention pass finished");
        }
        Ok(RetentionSummary {
            predictions_discarded,
            snapshots_pruned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::prediction::types::Subsystem;
    use crate::test_support::{at, fuel_series, memory_stores, pending_prediction};

    #[tokio::test]
    async fn prunes_by_age_and_keeps_recent_state() {
        let (store, stores) = memory_stores("gen-1", None).await;
        let day = 24 * 60;
        for snapshot in fuel_series(&[(0, 80.0), (40 * day, 60.0), (50 * day, 40.0)]) {
            stores.telemetry.insert_snapshot("gen-1", &snapshot).await.unwrap();
        }
        let stale = pending_prediction("gen-1", Subsystem::Generator, at(41 * day), 5.0, 5.0);
        let fresh = pending_prediction("gen-1", Subsystem::Generator, at(49 * day), 5.0, 5.0);
        stores.predictions.insert_prediction(&stale).await.unwrap();
        stores.predictions.insert_prediction(&fresh).await.unwrap();

        let service = RetentionService::new(stores, Duration::from_secs(86_400), 7, 42);
        let summary = service.tick_once(at(50 * day)).await.unwrap();

        assert_eq!(
            summary,
            RetentionSummary {
                predictions_discarded: 1,
                snapshots_pruned: 1,
            }
        );
        assert_eq!(store.snapshot_count("gen-1"), 2);
        assert!(store.prediction(fresh.id).is_some());
    }
}
