use anyhow::Context;

mod eval;
pub mod types;

pub use eval::evaluate;

use crate::error::{CoreError, CoreResult};
use crate::store::Stores;
use crate::telemetry::TelemetrySnapshot;
use types::{default_rules, validate_bounds, ThresholdParameter, ThresholdReport, ThresholdRule};

/// Per-device rule storage around the stateless evaluator.
#[derive(Clone)]
pub struct ThresholdService {
    stores: Stores,
}

impl ThresholdService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    async fn ensure_device(&self, device_id: &str) -> CoreResult<()> {
        let exists = self
            .stores
            .devices
            .device_exists(device_id)
            .await
            .with_context(|| format!("failed to look up device {device_id}"))?;
        if !exists {
            return Err(CoreError::DeviceNotFound(device_id.to_string()));
        }
        Ok(())
    }

    pub async fn evaluate(
        &self,
        device_id: &str,
        snapshot: &TelemetrySnapshot,
    ) -> CoreResult<ThresholdReport> {
        let rules = self.rules(device_id).await?;
        let report = evaluate(device_id, &rules, snapshot);

        for rule in &report.misconfigured {
            tracing::warn!(
                device_id,
                parameter = %rule.parameter,
                min_value = rule.min_value,
                max_value = rule.max_value,
                "threshold rule misconfigured: {}",
                rule.reason
            );
        }
        if !report.alarms.is_empty() {
            tracing::debug!(device_id, alarms = report.alarms.len(), "threshold alarms raised");
        }
        Ok(report)
    }

    pub async fn rules(&self, device_id: &str) -> CoreResult<Vec<ThresholdRule>> {
        self.ensure_device(device_id).await?;
        Ok(self
            .stores
            .rules
            .rules(device_id)
            .await
            .with_context(|| format!("failed to load threshold rules for {device_id}"))?)
    }

    /// Inserts a default rule for every parameter the device has no rule for yet.
    pub async fn initialize_defaults(&self, device_id: &str) -> CoreResult<u64> {
        self.ensure_device(device_id).await?;
        let inserted = self
            .stores
            .rules
            .insert_missing_rules(device_id, &default_rules())
            .await
            .with_context(|| format!("failed to bootstrap threshold rules for {device_id}"))?;
        if inserted > 0 {
            tracing::info!(device_id, inserted, "default threshold rules created");
        }
        Ok(inserted)
    }

    pub async fn update_rule(
        &self,
        device_id: &str,
        parameter: ThresholdParameter,
        min_value: f64,
        max_value: f64,
    ) -> CoreResult<ThresholdRule> {
        validate_bounds(min_value, max_value).map_err(CoreError::InvalidRule)?;
        self.ensure_device(device_id).await?;

        let rule = ThresholdRule::new(parameter, min_value, max_value);
        self.stores
            .rules
            .upsert_rule(device_id, &rule)
            .await
            .with_context(|| format!("failed to save threshold rule for {device_id}"))?;
        tracing::info!(
            device_id,
            parameter = %parameter,
            min_value,
            max_value,
            "threshold rule updated"
        );
        Ok(rule)
    }
}
