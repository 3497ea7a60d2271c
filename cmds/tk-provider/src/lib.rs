pub mod commands;
pub mod config;
pub mod kubectl;
pub mod manifest;
pub mod provider;
pub mod telemetry;
pub mod yaml;
