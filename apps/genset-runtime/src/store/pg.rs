use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json as SqlJson;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{CorrectionStore, DeviceRegistry, PredictionStore, TelemetryStore, ThresholdRuleStore};
use crate::device::DeviceSpec;
use crate::services::correction::CorrectionFactors;
use crate::services::prediction::types::{RuntimePrediction, Subsystem};
use crate::services::thresholds::types::ThresholdRule;
use crate::telemetry::TelemetrySnapshot;

/// Postgres adapter for every store port.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DeviceRow {
    fuel_tank_capacity_liters: Option<f64>,
    battery_voltage_nominal: Option<f64>,
    generator_capacity_kw: Option<f64>,
    battery_capacity_ah: Option<f64>,
}

impl From<DeviceRow> for DeviceSpec {
    fn from(row: DeviceRow) -> Self {
        Self {
            fuel_tank_capacity_liters: row.fuel_tank_capacity_liters,
            battery_voltage_nominal: row.battery_voltage_nominal,
            generator_capacity_kw: row.generator_capacity_kw,
            battery_capacity_ah: row.battery_capacity_ah,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct RuleRow {
    parameter: String,
    min_value: f64,
    max_value: f64,
    unit: String,
}

#[derive(Debug, Clone, FromRow)]
struct PredictionRow {
    id: Uuid,
    device_id: String,
    subsystem: String,
    predicted_at: DateTime<Utc>,
    fuel_level_percent: Option<f64>,
    battery_voltage: Option<f64>,
    battery_soc_percent: Option<f64>,
    avg_load_kw: Option<f64>,
    depletion_rate: f64,
    rate_source: String,
    fuel_burn_rate_liters_per_hour: Option<f64>,
    raw_runtime_hours: f64,
    correction_factor: f64,
    predicted_runtime_hours: f64,
    confidence: f64,
    predicted_depletion_at: DateTime<Utc>,
    actual_runtime_hours: Option<f64>,
    actual_depletion_at: Option<DateTime<Utc>>,
    error_hours: Option<f64>,
    error_percent: Option<f64>,
}

impl TryFrom<PredictionRow> for RuntimePrediction {
    type Error = anyhow::Error;

    fn try_from(row: PredictionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            device_id: row.device_id,
            subsystem: row.subsystem.parse().map_err(|err: String| anyhow!(err))?,
            predicted_at: row.predicted_at,
            fuel_level_percent: row.fuel_level_percent,
            battery_voltage: row.battery_voltage,
            battery_soc_percent: row.battery_soc_percent,
            avg_load_kw: row.avg_load_kw,
            depletion_rate: row.depletion_rate,
            rate_source: row.rate_source.parse().map_err(|err: String| anyhow!(err))?,
            fuel_burn_rate_liters_per_hour: row.fuel_burn_rate_liters_per_hour,
            raw_runtime_hours: row.raw_runtime_hours,
            correction_factor: row.correction_factor,
            predicted_runtime_hours: row.predicted_runtime_hours,
            confidence: row.confidence,
            predicted_depletion_at: row.predicted_depletion_at,
            actual_runtime_hours: row.actual_runtime_hours,
            actual_depletion_at: row.actual_depletion_at,
            error_hours: row.error_hours,
            error_percent: row.error_percent,
        })
    }
}

const PREDICTION_COLUMNS: &str = r#"
  id,
  device_id,
  subsystem,
  predicted_at,
  fuel_level_percent,
  battery_voltage,
  battery_soc_percent,
  avg_load_kw,
  depletion_rate,
  rate_source,
  fuel_burn_rate_liters_per_hour,
  raw_runtime_hours,
  correction_factor,
  predicted_runtime_hours,
  confidence,
  predicted_depletion_at,
  actual_runtime_hours,
  actual_depletion_at,
  error_hours,
  error_percent
"#;

#[derive(Debug, Clone, FromRow)]
struct CorrectionRow {
    device_id: String,
    subsystem: String,
    correction_factor: f64,
    prediction_count: i64,
    actual_event_count: i64,
    avg_error_percent: Option<f64>,
    error_sample_count: i64,
    learning_rate: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_event_at: Option<DateTime<Utc>>,
}

impl TryFrom<CorrectionRow> for CorrectionFactors {
    type Error = anyhow::Error;

    fn try_from(row: CorrectionRow) -> Result<Self> {
        Ok(Self {
            device_id: row.device_id,
            subsystem: row.subsystem.parse().map_err(|err: String| anyhow!(err))?,
            correction_factor: row.correction_factor,
            prediction_count: row.prediction_count,
            actual_event_count: row.actual_event_count,
            avg_error_percent: row.avg_error_percent,
            error_sample_count: row.error_sample_count,
            learning_rate: row.learning_rate,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_event_at: row.last_event_at,
        })
    }
}

const CORRECTION_COLUMNS: &str = r#"
  device_id,
  subsystem,
  correction_factor,
  prediction_count,
  actual_event_count,
  avg_error_percent,
  error_sample_count,
  learning_rate,
  created_at,
  updated_at,
  last_event_at
"#;

#[async_trait]
impl TelemetryStore for PgStore {
    async fn snapshots(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySnapshot>> {
        let rows: Vec<(SqlJson<TelemetrySnapshot>,)> = sqlx::query_as(
            r#"
            SELECT readings
            FROM telemetry_snapshots
            WHERE device_id = $1
              AND ts >= $2
              AND ts <= $3
            ORDER BY ts ASC
            "#,
        )
        .bind(device_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await
        .with_context(|| format!("failed to query telemetry snapshots for {device_id}"))?;

        Ok(rows.into_iter().map(|(SqlJson(snapshot),)| snapshot).collect())
    }

    async fn insert_snapshot(&self, device_id: &str, snapshot: &TelemetrySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO telemetry_snapshots (device_id, ts, readings)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(device_id)
        .bind(snapshot.timestamp)
        .bind(SqlJson(snapshot))
        .execute(&self.db)
        .await
        .with_context(|| format!("failed to insert telemetry snapshot for {device_id}"))?;
        Ok(())
    }

    async fn prune_snapshots_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM telemetry_snapshots WHERE ts < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await
            .context("failed to prune telemetry_snapshots")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DeviceRegistry for PgStore {
    async fn device_exists(&self, device_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM devices WHERE device_id = $1)")
                .bind(device_id)
                .fetch_one(&self.db)
                .await
                .with_context(|| format!("failed to check device {device_id}"))?;
        Ok(exists)
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT device_id FROM devices ORDER BY device_id")
                .fetch_all(&self.db)
                .await
                .context("failed to list devices")?;
        Ok(ids)
    }

    async fn device_spec(&self, device_id: &str) -> Result<Option<DeviceSpec>> {
        let row: Option<DeviceRow> = sqlx::query_as(
            r#"
            SELECT
              fuel_tank_capacity_liters,
              battery_voltage_nominal,
              generator_capacity_kw,
              battery_capacity_ah
            FROM devices
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("failed to load device spec for {device_id}"))?;
        Ok(row.map(DeviceSpec::from))
    }

    async fn upsert_device(&self, device_id: &str, spec: &DeviceSpec) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (
              device_id,
              fuel_tank_capacity_liters,
              battery_voltage_nominal,
              generator_capacity_kw,
              battery_capacity_ah
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (device_id) DO UPDATE
              SET fuel_tank_capacity_liters = EXCLUDED.fuel_tank_capacity_liters,
                  battery_voltage_nominal = EXCLUDED.battery_voltage_nominal,
                  generator_capacity_kw = EXCLUDED.generator_capacity_kw,
                  battery_capacity_ah = EXCLUDED.battery_capacity_ah,
                  updated_at = now()
            "#,
        )
        .bind(device_id)
        .bind(spec.fuel_tank_capacity_liters)
        .bind(spec.battery_voltage_nominal)
        .bind(spec.generator_capacity_kw)
        .bind(spec.battery_capacity_ah)
        .execute(&self.db)
        .await
        .with_context(|| format!("failed to upsert device {device_id}"))?;
        Ok(())
    }
}

#[async_trait]
impl ThresholdRuleStore for PgStore {
    async fn rules(&self, device_id: &str) -> Result<Vec<ThresholdRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT parameter, min_value, max_value, unit
            FROM threshold_rules
            WHERE device_id = $1
            ORDER BY parameter
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.db)
        .await
        .with_context(|| format!("failed to load threshold rules for {device_id}"))?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match row.parameter.parse() {
                Ok(parameter) => rules.push(ThresholdRule {
                    parameter,
                    min_value: row.min_value,
                    max_value: row.max_value,
                    unit: row.unit,
                }),
                Err(err) => {
                    tracing::warn!(device_id, "skipping stored threshold rule: {err}");
                }
            }
        }
        Ok(rules)
    }

    async fn upsert_rule(&self, device_id: &str, rule: &ThresholdRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO threshold_rules (
              device_id, parameter, min_value, max_value, unit, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (device_id, parameter) DO UPDATE
              SET min_value = EXCLUDED.min_value,
                  max_value = EXCLUDED.max_value,
                  unit = EXCLUDED.unit,
                  updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(device_id)
        .bind(rule.parameter.as_str())
        .bind(rule.min_value)
        .bind(rule.max_value)
        .bind(&rule.unit)
        .execute(&self.db)
        .await
        .with_context(|| format!("failed to upsert threshold rule {}", rule.parameter))?;
        Ok(())
    }

    async fn insert_missing_rules(&self, device_id: &str, rules: &[ThresholdRule]) -> Result<u64> {
        let mut tx = self
            .db
            .begin()
            .await
            .context("failed to begin threshold bootstrap")?;
        let mut inserted = 0u64;
        for rule in rules {
            let result = sqlx::query(
                r#"
                INSERT INTO threshold_rules (device_id, parameter, min_value, max_value, unit)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (device_id, parameter) DO NOTHING
                "#,
            )
            .bind(device_id)
            .bind(rule.parameter.as_str())
            .bind(rule.min_value)
            .bind(rule.max_value)
            .bind(&rule.unit)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert default rule {}", rule.parameter))?;
            inserted += result.rows_affected();
        }
        tx.commit()
            .await
            .context("failed to commit threshold bootstrap")?;
        Ok(inserted)
    }
}

#[async_trait]
impl PredictionStore for PgStore {
    async fn insert_prediction(&self, prediction: &RuntimePrediction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runtime_predictions (
              id,
              device_id,
              subsystem,
              predicted_at,
              fuel_level_percent,
              battery_voltage,
              battery_soc_percent,
              avg_load_kw,
              depletion_rate,
              rate_unit,
              rate_source,
              fuel_burn_rate_liters_per_hour,
              raw_runtime_hours,
              correction_factor,
              predicted_runtime_hours,
              confidence,
              predicted_depletion_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            "#,
        )
        .bind(prediction.id)
        .bind(&prediction.device_id)
        .bind(prediction.subsystem.as_str())
        .bind(prediction.predicted_at)
        .bind(prediction.fuel_level_percent)
        .bind(prediction.battery_voltage)
        .bind(prediction.battery_soc_percent)
        .bind(prediction.avg_load_kw)
        .bind(prediction.depletion_rate)
        .bind(prediction.rate_unit())
        .bind(prediction.rate_source.as_str())
        .bind(prediction.fuel_burn_rate_liters_per_hour)
        .bind(prediction.raw_runtime_hours)
        .bind(prediction.correction_factor)
        .bind(prediction.predicted_runtime_hours)
        .bind(prediction.confidence)
        .bind(prediction.predicted_depletion_at)
        .execute(&self.db)
        .await
        .with_context(|| format!("failed to insert prediction for {}", prediction.device_id))?;
        Ok(())
    }

    async fn latest_prediction(
        &self,
        device_id: &str,
        subsystem: Subsystem,
    ) -> Result<Option<RuntimePrediction>> {
        let query = format!(
            "SELECT {PREDICTION_COLUMNS} FROM runtime_predictions \
             WHERE device_id = $1 AND subsystem = $2 \
             ORDER BY predicted_at DESC LIMIT 1"
        );
        let row: Option<PredictionRow> = sqlx::query_as(&query)
            .bind(device_id)
            .bind(subsystem.as_str())
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("failed to load latest {subsystem} prediction"))?;
        row.map(RuntimePrediction::try_from).transpose()
    }

    async fn latest_unreconciled(
        &self,
        device_id: &str,
        subsystem: Subsystem,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<RuntimePrediction>> {
        let query = format!(
            "SELECT {PREDICTION_COLUMNS} FROM runtime_predictions \
             WHERE device_id = $1 AND subsystem = $2 \
               AND actual_depletion_at IS NULL \
               AND predicted_at >= $3 AND predicted_at <= $4 \
             ORDER BY predicted_at DESC LIMIT 1"
        );
        let row: Option<PredictionRow> = sqlx::query_as(&query)
            .bind(device_id)
            .bind(subsystem.as_str())
            .bind(from)
            .bind(to)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("failed to match {subsystem} prediction for {device_id}"))?;
        row.map(RuntimePrediction::try_from).transpose()
    }

    async fn save_reconciliation(&self, prediction: &RuntimePrediction) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE runtime_predictions
            SET actual_runtime_hours = $2,
                actual_depletion_at = $3,
                error_hours = $4,
                error_percent = $5
            WHERE id = $1
            "#,
        )
        .bind(prediction.id)
        .bind(prediction.actual_runtime_hours)
        .bind(prediction.actual_depletion_at)
        .bind(prediction.error_hours)
        .bind(prediction.error_percent)
        .execute(&self.db)
        .await
        .with_context(|| format!("failed to reconcile prediction {}", prediction.id))?;
        if result.rows_affected() == 0 {
            anyhow::bail!("prediction {} not found", prediction.id);
        }
        Ok(())
    }

    async fn discard_unreconciled_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM runtime_predictions
            WHERE actual_depletion_at IS NULL
              AND predicted_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.db)
        .await
        .context("failed to discard stale predictions")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CorrectionStore for PgStore {
    async fn correction(
        &self,
        device_id: &str,
        subsystem: Subsystem,
    ) -> Result<Option<CorrectionFactors>> {
        let query = format!(
            "SELECT {CORRECTION_COLUMNS} FROM prediction_correction_factors \
             WHERE device_id = $1 AND subsystem = $2"
        );
        let row: Option<CorrectionRow> = sqlx::query_as(&query)
            .bind(device_id)
            .bind(subsystem.as_str())
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("failed to load {subsystem} correction for {device_id}"))?;
        row.map(CorrectionFactors::try_from).transpose()
    }

    async fn corrections(&self, device_id: &str) -> Result<Vec<CorrectionFactors>> {
        let query = format!(
            "SELECT {CORRECTION_COLUMNS} FROM prediction_correction_factors \
             WHERE device_id = $1 ORDER BY subsystem"
        );
        let rows: Vec<CorrectionRow> = sqlx::query_as(&query)
            .bind(device_id)
            .fetch_all(&self.db)
            .await
            .with_context(|| format!("failed to load corrections for {device_id}"))?;
        rows.into_iter().map(CorrectionFactors::try_from).collect()
    }

    async fn upsert_correction(&self, factors: &CorrectionFactors) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prediction_correction_factors (
              device_id,
              subsystem,
              correction_factor,
              prediction_count,
              actual_event_count,
              avg_error_percent,
              error_sample_count,
              learning_rate,
              created_at,
              updated_at,
              last_event_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            ON CONFLICT (device_id, subsystem) DO UPDATE
              SET correction_factor = EXCLUDED.correction_factor,
                  prediction_count = EXCLUDED.prediction_count,
                  actual_event_count = EXCLUDED.actual_event_count,
                  avg_error_percent = EXCLUDED.avg_error_percent,
                  error_sample_count = EXCLUDED.error_sample_count,
                  learning_rate = EXCLUDED.learning_rate,
                  updated_at = EXCLUDED.updated_at,
                  last_event_at = EXCLUDED.last_event_at
            "#,
        )
        .bind(&factors.device_id)
        .bind(factors.subsystem.as_str())
        .bind(factors.correction_factor)
        .bind(factors.prediction_count)
        .bind(factors.actual_event_count)
        .bind(factors.avg_error_percent)
        .bind(factors.error_sample_count)
        .bind(factors.learning_rate)
        .bind(factors.created_at)
        .bind(factors.updated_at)
        .bind(factors.last_event_at)
        .execute(&self.db)
        .await
        .with_context(|| {
            format!(
                "failed to upsert {} correction for {}",
                factors.subsystem, factors.device_id
            )
        })?;
        Ok(())
    }
}
