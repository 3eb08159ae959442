use crate::config::Config;
use crate::error::TransportError;
use crate::models::{FlightResponse, HealthStatus, SearchQuery};
use crate::provider::FlightProvider;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Error body shape of the upstream API (`{"detail": "..."}`).
#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HttpFlightProvider {
    client: Client,
    base_url: String,
}

impl HttpFlightProvider {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.detail);
            return Err(TransportError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl FlightProvider for HttpFlightProvider {
    async fn search(&self, query: &SearchQuery) -> Result<FlightResponse, TransportError> {
        let url = format!("{}/flights", self.base_url);
        debug!(%url, origin = %query.origin, destination = %query.destination, "GET flights");
        let response = self
            .client
            .get(url)
            .query(&query.query_params())
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn health(&self) -> Result<HealthStatus, TransportError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Self::decode(response).await
    }
}
