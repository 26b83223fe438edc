//! Conversion worker, RPC bridge and conversion controller.
//!
//! The worker side (`worker`, `dispatcher`, `lifecycle`, `handles`) owns the
//! foreign engine and everything it produces. The controller side (`bridge`,
//! `controller`) only ever sees tracking ids and serializable projections.
//! The two sides talk over a `transport::Transport`.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod engine;
pub mod handles;
pub mod lifecycle;
pub mod mock;
pub mod telemetry;
pub mod transport;
pub mod worker;

pub use bridge::Bridge;
pub use bridge::Fault;
pub use config::ConvertFailurePolicy;
pub use config::ConverterConfig;
pub use controller::Converter;
pub use controller::ConverterState;
pub use worker::Worker;
