//! Middleware for observability.
//!
//! This module provides request logging with latency tracking for the
//! streaming surface's HTTP/WebSocket-upgrade endpoints.

pub mod logging;

pub use logging::request_logging_simple;
