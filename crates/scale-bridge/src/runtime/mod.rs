mod app;
mod config;
mod logging;
mod service;
mod telemetry;

pub use app::run_from_args;
