pub mod logging;
pub mod metrics;
pub mod secrets;
pub mod shutdown;

// Re-export common functions and types
pub use logging::init_logging;
pub use metrics::MetricsCollector;
pub use secrets::read_secret;
pub use shutdown::Shutdown;
