//! HTTP request handlers for the Connect auth service.

pub mod health;
pub mod lifecycle;
pub mod metrics;

pub use health::health_check;
pub use lifecycle::{installed, uninstalled};
pub use metrics::metrics_handler;
