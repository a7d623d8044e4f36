pub mod cli;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub mod test_support;
