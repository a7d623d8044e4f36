use crate::config::RuntimeConfig;
use crate::services::correction::CorrectionService;
use crate::services::device_locks::DeviceLocks;
use crate::services::prediction::RuntimePredictionEngine;
use crate::services::thresholds::ThresholdService;
use crate::store::Stores;

#[derive(Clone)]
pub struct AppState {
    pub config: RuntimeConfig,
    pub stores: Stores,
    pub thresholds: ThresholdService,
    pub engine: RuntimePredictionEngine,
    pub corrections: CorrectionService,
}

impl AppState {
    /// Wires the services over one set of stores. The engine and the learning loop share
    /// the same per-device locks.
    pub fn new(config: RuntimeConfig, stores: Stores) -> Self {
        let locks = DeviceLocks::new();
        let engine = RuntimePredictionEngine::new(
            stores.clone(),
            locks.clone(),
            config.analyzer.clone(),
            config.prediction.clone(),
        );
        let corrections =
            CorrectionService::new(stores.clone(), locks, config.prediction.clone());
        Self {
            thresholds: ThresholdService::new(stores.clone()),
            engine,
            corrections,
            stores,
            config,
        }
    }
}
