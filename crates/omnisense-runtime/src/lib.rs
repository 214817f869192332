//! `omnisense-runtime` – the fusion and broadcast engine.
//!
//! Ties the hardware layer, perception, the command gate and the event bus
//! together into one fixed-cadence control loop.
//!
//! # Modules
//!
//! - [`fusion_loop`] – [`FusionLoop`][fusion_loop::FusionLoop]: reads every
//!   sensor once per cycle, runs sector detection and object tracking, asks
//!   the [`Navigator`][navigator::Navigator] for a decision, actuates
//!   according to the operating mode and publishes a
//!   [`Snapshot`][omnisense_types::Snapshot].  A sensor that keeps failing
//!   forces a safe STOP.
//! - [`navigator`] – [`Navigator`][navigator::Navigator]: the MOVING /
//!   ROTATING state machine that turns fused obstacle reports into a
//!   direction and speed.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.
//!
//! # Command gating
//!
//! Every operator command passes through
//! [`CommandGate::verify`][omnisense_kernel::CommandGate::verify] before the
//! loop applies it.  Rejected commands are logged and dropped.

pub mod fusion_loop;
pub mod navigator;
pub mod telemetry;

pub use fusion_loop::{FusionLoop, LoopConfig};
pub use navigator::{Navigator, NavigatorConfig};
pub use telemetry::{LogFormat, LoggingConfig, TracerProviderGuard, init_tracing};
