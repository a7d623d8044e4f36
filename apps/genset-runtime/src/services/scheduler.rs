use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::services::prediction::RuntimePredictionEngine;
use crate::store::DeviceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub devices: usize,
    pub failed: usize,
}

/// Periodic prediction cycle across every registered device.
pub struct PredictionSchedulerService {
    engine: RuntimePredictionEngine,
    devices: Arc<dyn DeviceRegistry>,
    interval: Duration,
    concurrency: usize,
}

impl PredictionSchedulerService {
    pub fn new(
        engine: RuntimePredictionEngine,
        devices: Arc<dyn DeviceRegistry>,
        interval: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            engine,
            devices,
            interval,
            concurrency: concurrency.max(1),
        }
    }

    pub fn start(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.tick_once().await {
                            tracing::warn!("prediction scheduler tick failed: {err:#}");
                        }
                    }
                }
            }
        });
    }

    pub async fn tick_once(&self) -> Result<BatchSummary> {
        let device_ids = self
            .devices
            .list_devices()
            .await
            .context("failed to list devices")?;
        let failed = AtomicUsize::new(0);

        futures::stream::iter(device_ids.iter())
            .for_each_concurrent(self.concurrency, |device_id| {
                let failed = &failed;
                async move {
                    if let Err(err) = self.engine.run_prediction_cycle(device_id).await {
                        failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(device_id = %device_id, "prediction cycle failed: {err:#}");
                    }
                }
            })
            .await;

        let summary = BatchSummary {
            devices: device_ids.len(),
            failed: failed.into_inner(),
        };
        tracing::info!(
            devices = summary.devices,
            failed = summary.failed,
            "prediction batch finished"
        );
        Ok(summary)
    }
}
