use crate::error::TransportError;
use crate::models::{FlightResponse, HealthStatus, SearchQuery};
use async_trait::async_trait;

/// Remote source of flight data.
///
/// A business failure (`error_code != 0`) is a successful call from the
/// transport's point of view and comes back as `Ok`.
#[async_trait]
pub trait FlightProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<FlightResponse, TransportError>;
    async fn health(&self) -> Result<HealthStatus, TransportError>;
}

pub mod http;
pub mod memory;

pub use http::HttpFlightProvider;
pub use memory::MemoryProvider;
