pub mod analyzers;
pub mod correction;
pub mod device_locks;
pub mod prediction;
pub mod retention;
pub mod scheduler;
pub mod thresholds;
