pub mod handlers;

pub use handlers::{health_handler, hostname, HealthStatus};
