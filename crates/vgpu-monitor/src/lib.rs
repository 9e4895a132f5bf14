pub mod api;
pub mod app;
pub mod config;
pub mod k8s;
pub mod logging;
mod metrics;
pub mod monitor;
