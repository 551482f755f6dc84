//! Observability for the Connect auth service.
//!
//! Provides metric definitions; the Prometheus recorder is installed by the binary.

pub mod metrics;
