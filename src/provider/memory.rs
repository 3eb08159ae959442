use crate::error::TransportError;
use crate::models::{FlightResponse, HealthStatus, SearchQuery};
use crate::provider::FlightProvider;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Reply = Result<FlightResponse, TransportError>;

/// In-process provider. Scripted replies are consumed in call order; once
/// they run out every call gets the fallback reply.
#[derive(Clone)]
pub struct MemoryProvider {
    scripted: Arc<Mutex<VecDeque<(Duration, Reply)>>>,
    fallback: Arc<Mutex<Reply>>,
    queries: Arc<Mutex<Vec<SearchQuery>>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryProvider {
    pub fn new(fallback: FlightResponse) -> Self {
        Self {
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(Ok(fallback))),
            queries: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues a reply delivered after `delay`.
    pub fn push_reply(&self, delay: Duration, reply: Reply) {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((delay, reply));
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(FlightResponse::success(Vec::new()))
    }
}

#[async_trait]
impl FlightProvider for MemoryProvider {
    async fn search(&self, query: &SearchQuery) -> Result<FlightResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());

        let next = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let (delay, reply) = match next {
            Some(scripted) => scripted,
            None => {
                let fallback = self
                    .fallback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                (Duration::ZERO, fallback)
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }

    async fn health(&self) -> Result<HealthStatus, TransportError> {
        Ok(HealthStatus {
            status: "healthy".to_string(),
            service: "memory-flight-provider".to_string(),
        })
    }
}
