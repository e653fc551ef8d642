//! Health and metrics endpoints
//!
//! Serves the liveness, readiness and Prometheus endpoints used by the
//! controller's Deployment.

mod handlers;
mod server;

pub use handlers::HealthResponse;
pub use server::{router, run_server};
