//! Request-logging middleware only — no auth or rate limiting (spec.md
//! Non-goals).

pub mod logging;

pub use logging::request_logging;
