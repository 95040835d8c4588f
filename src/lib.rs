pub mod audit;
pub mod authz;
pub mod catalog;
pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod import;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod security_middleware;
pub mod simulator;

pub use config::Config;
pub use errors::{Result, RewardsEngineError};
