//! ---
//! fx_section: "01-core-functionality"
//! fx_subsection: "module"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Shared primitives and utilities for the fleet exchange."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
//! Core shared primitives for the fleet exchange workspace.
//! This crate exposes configuration loading, tracing setup, and loop
//! timing utilities consumed by the producer and consumer binaries.

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{
    AppConfig, ConsumerConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, ProducerConfig,
    VehicleProfile,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{JitterHistogram, JitterSummary, LoopTimingReporter};
