pub mod logger;
pub mod metrics;

pub use logger::init_logging;
pub use metrics::AgentMetrics;
