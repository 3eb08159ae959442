pub mod config;
pub mod error;
pub mod filter;
pub mod history;
mod models;
pub mod notifications;
pub mod provider;
pub mod session;
pub mod storage;

pub use config::Config;
pub use error::{SearchError, TransportError, ValidationError};
pub use filter::{DepartureWindow, FilterCriteria, SortKey};
pub use history::{HistoryEntry, SearchHistory};
pub use models::{
    Flight, FlightResponse, HealthStatus, ResultPage, SearchForm, SearchQuery, TripType,
};
pub use notifications::{Notification, NotificationEvent, NotificationQueue, Severity};
pub use session::{SearchSession, SearchSummary, SessionEvent, SessionPhase, SessionSnapshot};

use anyhow::Result;
use provider::{FlightProvider, HttpFlightProvider, MemoryProvider};
use std::sync::Arc;
use storage::FileStore;

/// Session wired to the HTTP provider and the on-disk history.
pub type HttpSession = SearchSession<HttpFlightProvider, FileStore>;

/// Session answering from canned data, still backed by the on-disk history.
pub type OfflineSession = SearchSession<MemoryProvider, FileStore>;

/// Builds a session from `config`, loading any persisted history.
pub fn open_session(config: &Config) -> Result<HttpSession> {
    let provider = HttpFlightProvider::new(config)?;
    assemble(config, provider)
}

/// Like [`open_session`], but every search returns `flights`.
pub fn open_offline_session(config: &Config, flights: Vec<Flight>) -> Result<OfflineSession> {
    assemble(config, MemoryProvider::new(FlightResponse::success(flights)))
}

fn assemble<P: FlightProvider>(config: &Config, provider: P) -> Result<SearchSession<P, FileStore>> {
    let store = FileStore::new(&config.history_dir)?;
    let history = Arc::new(SearchHistory::open(store, config.history_capacity));
    let notifications =
        NotificationQueue::new(config.notification_duration, config.max_visible_notifications);
    Ok(SearchSession::new(provider, history, notifications))
}
