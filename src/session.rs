//! Search session controller.
//!
//! Owns the current query and result set. Each accepted submit takes a fresh
//! fencing token; a response is applied only if its token is still the
//! latest one issued when it arrives; `clear` also advances the token, so
//! anything in flight at that point is dropped on arrival.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SearchError, TransportError};
use crate::filter::{self, FilterCriteria, SortKey};
use crate::history::SearchHistory;
use crate::models::{Flight, FlightResponse, HealthStatus, SearchForm, SearchQuery};
use crate::notifications::{NotificationQueue, Severity};
use crate::provider::FlightProvider;
use crate::storage::KeyValueStore;

/// Reason recorded when the provider reports failure without one.
pub const UNKNOWN_BUSINESS_ERROR: &str = "Unknown error occurred";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Searching,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    Searching { token: u64 },
    Succeeded { token: u64, total: u32 },
    Failed { token: u64, reason: String },
    Discarded { token: u64 },
    Cleared,
}

/// Point-in-time copy of the session for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub query: Option<SearchQuery>,
    pub flights: Vec<Flight>,
    pub total: u32,
    pub error: Option<String>,
    pub token: u64,
}

impl SessionSnapshot {
    pub fn is_loading(&self) -> bool {
        self.phase == SessionPhase::Searching
    }
}

/// Returned by a submit whose response was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub token: u64,
    pub total: u32,
    pub returned: usize,
}

pub struct SearchSession<P: FlightProvider, S: KeyValueStore> {
    provider: P,
    history: Arc<SearchHistory<S>>,
    notifications: NotificationQueue,
    state: Mutex<SessionSnapshot>,
    sender: Sender<SessionEvent>,
}

impl<P: FlightProvider, S: KeyValueStore> SearchSession<P, S> {
    pub fn new(
        provider: P,
        history: Arc<SearchHistory<S>>,
        notifications: NotificationQueue,
    ) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            provider,
            history,
            notifications,
            state: Mutex::new(SessionSnapshot::default()),
            sender,
        }
    }

    pub fn subscribe(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Validates the form and runs the search.
    ///
    /// Invalid input is reported through the notification queue and never
    /// reaches the provider or the `Error` phase. A response that lost the
    /// race to a newer submit (or a clear) yields
    /// [`SearchError::Superseded`] and leaves the state untouched.
    pub async fn submit(&self, form: SearchForm) -> Result<SearchSummary, SearchError> {
        let query = match form.validate() {
            Ok(query) => query,
            Err(err) => {
                debug!(error = %err, "search rejected");
                self.notifications.show(err.to_string(), Severity::Error);
                return Err(err.into());
            }
        };

        let token = {
            let mut state = self.lock();
            state.token += 1;
            state.phase = SessionPhase::Searching;
            state.error = None;
            state.query = Some(query.clone());
            state.token
        };
        info!(
            token,
            origin = %query.origin,
            destination = %query.destination,
            date = %query.date,
            "searching flights"
        );
        let _ = self.sender.send(SessionEvent::Searching { token });

        let reply = self.provider.search(&query).await;
        self.apply(token, query, reply)
    }

    /// Re-runs a remembered search.
    pub async fn resubmit(&self, entry_id: Uuid) -> Result<SearchSummary, SearchError> {
        let entry = self
            .history
            .get(entry_id)
            .ok_or(SearchError::UnknownHistoryEntry(entry_id))?;
        self.submit(SearchForm::from(entry.query())).await
    }

    /// Back to `Idle`, dropping results, error, and any in-flight request.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            let token = state.token + 1;
            *state = SessionSnapshot {
                token,
                ..SessionSnapshot::default()
            };
        }
        debug!("search session cleared");
        let _ = self.sender.send(SessionEvent::Cleared);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Current results after filtering and sorting.
    pub fn display(&self, criteria: &FilterCriteria, sort: SortKey) -> Vec<Flight> {
        filter::apply(&self.lock().flights, criteria, sort)
    }

    /// Airlines available for filtering, taken from the unfiltered results.
    pub fn available_airlines(&self) -> Vec<String> {
        filter::available_airlines(&self.lock().flights)
    }

    pub async fn health(&self) -> Result<HealthStatus, TransportError> {
        self.provider.health().await
    }

    pub fn history(&self) -> &Arc<SearchHistory<S>> {
        &self.history
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    fn apply(
        &self,
        token: u64,
        query: SearchQuery,
        reply: Result<FlightResponse, TransportError>,
    ) -> Result<SearchSummary, SearchError> {
        let mut state = self.lock();
        if state.token != token {
            let latest = state.token;
            drop(state);
            debug!(token, latest, "discarding stale search response");
            let _ = self.sender.send(SessionEvent::Discarded { token });
            return Err(SearchError::Superseded { token });
        }

        match reply {
            Ok(response) if response.is_success() => {
                let total = response.result.total;
                let returned = response.result.list.len();
                state.phase = SessionPhase::Success;
                state.flights = response.result.list;
                state.total = total;
                state.error = None;
                drop(state);

                info!(token, total, returned, "search succeeded");
                self.history.add(query);
                let _ = self.sender.send(SessionEvent::Succeeded { token, total });
                Ok(SearchSummary {
                    token,
                    total,
                    returned,
                })
            }
            Ok(response) => {
                let reason = if response.reason.trim().is_empty() {
                    UNKNOWN_BUSINESS_ERROR.to_string()
                } else {
                    response.reason
                };
                Self::fail(&mut state, reason.clone());
                drop(state);

                warn!(token, code = response.error_code, %reason, "provider rejected search");
                let _ = self.sender.send(SessionEvent::Failed {
                    token,
                    reason: reason.clone(),
                });
                Err(SearchError::Business {
                    code: response.error_code,
                    reason,
                })
            }
            Err(err) => {
                let reason = err.fault_message();
                Self::fail(&mut state, reason.clone());
                drop(state);

                warn!(token, error = %err, "search request failed");
                let _ = self.sender.send(SessionEvent::Failed { token, reason });
                Err(SearchError::Transport(err))
            }
        }
    }

    fn fail(state: &mut SessionSnapshot, reason: String) {
        state.phase = SessionPhase::Error;
        state.error = Some(reason);
        state.flights.clear();
        state.total = 0;
    }

    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::DEFAULT_CAPACITY;
    use crate::models::fixtures::flight;
    use crate::notifications::NotificationState;
    use crate::provider::MemoryProvider;
    use crate::storage::MemoryStore;
    use futures::{FutureExt, StreamExt};
    use std::time::Duration;

    type TestSession = SearchSession<MemoryProvider, MemoryStore>;

    fn session(provider: MemoryProvider) -> TestSession {
        let history = Arc::new(SearchHistory::new(MemoryStore::new(), DEFAULT_CAPACITY));
        SearchSession::new(provider, history, NotificationQueue::default())
    }

    fn three_flights() -> Vec<Flight> {
        vec![
            flight("Air China", "CA1501", "2025-06-01 08:30", 900.0),
            flight("China Eastern", "MU5100", "2025-06-01 07:00", 500.0),
            flight("Air China", "CA1519", "2025-06-01 21:15", 1200.0),
        ]
    }

    fn pek_sha() -> SearchForm {
        SearchForm::one_way("PEK", "SHA", "2025-06-01")
    }

    #[tokio::test]
    async fn test_success_populates_state_and_history() {
        let provider = MemoryProvider::new(FlightResponse::success(three_flights()));
        let session = session(provider.clone());

        let summary = session.submit(pek_sha()).await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.token, 1);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Success);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.error, None);

        let shown = session.display(&FilterCriteria::default(), SortKey::Price);
        let prices: Vec<f64> = shown.iter().map(|f| f.price).collect();
        assert_eq!(prices, vec![500.0, 900.0, 1200.0]);

        let history = session.history().entries();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query().origin, "PEK");
        assert_eq!(provider.queries()[0].destination, "SHA");
    }

    #[tokio::test]
    async fn test_same_city_never_hits_the_network() {
        let provider = MemoryProvider::default();
        let session = session(provider.clone());

        let err = session
            .submit(SearchForm::one_way("pek", "PEK", "2025-06-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
        assert_eq!(provider.calls(), 0);
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.history().is_empty());

        let shown = session.notifications().list();
        assert_eq!(shown.len(), 1);
        assert_eq!(*shown[0].severity(), Severity::Error);
        assert_eq!(*shown[0].state(), NotificationState::Visible);
    }

    #[tokio::test]
    async fn test_business_error() {
        let provider = MemoryProvider::new(FlightResponse::failure(10012, "No flights on that date"));
        let session = session(provider);

        let err = session.submit(pek_sha()).await.unwrap_err();
        assert_eq!(
            err,
            SearchError::Business {
                code: 10012,
                reason: "No flights on that date".into()
            }
        );
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Error);
        assert_eq!(snapshot.error.as_deref(), Some("No flights on that date"));
        assert!(snapshot.flights.is_empty());
        assert_eq!(snapshot.total, 0);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_business_error_without_reason() {
        let session = session(MemoryProvider::new(FlightResponse::failure(1, "")));
        let _ = session.submit(pek_sha()).await;
        assert_eq!(
            session.snapshot().error.as_deref(),
            Some(UNKNOWN_BUSINESS_ERROR)
        );
    }

    #[tokio::test]
    async fn test_transport_error_clears_previous_results() {
        let provider = MemoryProvider::new(FlightResponse::success(three_flights()));
        let session = session(provider.clone());
        session.submit(pek_sha()).await.unwrap();

        provider.set_fallback(Err(TransportError::Status {
            status: 500,
            detail: Some("External API error".into()),
        }));
        let err = session.submit(pek_sha()).await.unwrap_err();
        assert!(matches!(err, SearchError::Transport(_)));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Error);
        assert_eq!(snapshot.error.as_deref(), Some("External API error"));
        assert!(snapshot.flights.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_is_discarded() {
        let provider = MemoryProvider::default();
        provider.push_reply(
            Duration::from_millis(500),
            Ok(FlightResponse::success(three_flights())),
        );
        provider.push_reply(
            Duration::from_millis(50),
            Ok(FlightResponse::success(vec![flight(
                "Hainan",
                "HU7605",
                "2025-06-02 13:40",
                650.0,
            )])),
        );
        let session = session(provider);
        let mut events = session.subscribe();

        let second_form = SearchForm::one_way("PEK", "SHA", "2025-06-02");
        let (first, second) = tokio::join!(session.submit(pek_sha()), session.submit(second_form));

        assert_eq!(first, Err(SearchError::Superseded { token: 1 }));
        assert_eq!(second.unwrap().token, 2);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Success);
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.flights[0].flight_no, "HU7605");
        assert_eq!(snapshot.query.unwrap().date.to_string(), "2025-06-02");

        let mut seen = Vec::new();
        while let Some(Some(Ok(event))) = events.next().now_or_never() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::Searching { token: 1 },
                SessionEvent::Searching { token: 2 },
                SessionEvent::Succeeded { token: 2, total: 1 },
                SessionEvent::Discarded { token: 1 },
            ]
        );

        // Only the applied search is remembered.
        let history = session.history().entries();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query().date.to_string(), "2025-06-02");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_mid_flight_drops_the_response() {
        let provider = MemoryProvider::default();
        provider.push_reply(
            Duration::from_millis(200),
            Ok(FlightResponse::success(three_flights())),
        );
        let session = session(provider);

        let pending = session.submit(pek_sha());
        let clear_later = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(session.phase(), SessionPhase::Searching);
            session.clear();
        };
        let (result, ()) = tokio::join!(pending, clear_later);

        assert!(matches!(result, Err(SearchError::Superseded { .. })));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(snapshot.flights.is_empty());
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_search_clears_previous_error() {
        let provider = MemoryProvider::new(FlightResponse::failure(3, "old failure"));
        let session = session(provider.clone());
        let _ = session.submit(pek_sha()).await;
        assert_eq!(session.phase(), SessionPhase::Error);

        provider.push_reply(
            Duration::from_millis(200),
            Ok(FlightResponse::success(three_flights())),
        );
        let pending = session.submit(pek_sha());
        let check = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let snapshot = session.snapshot();
            assert!(snapshot.is_loading());
            assert_eq!(snapshot.error, None);
        };
        let (result, ()) = tokio::join!(pending, check);
        assert_eq!(result.unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_clear_after_error() {
        let session = session(MemoryProvider::new(FlightResponse::failure(2, "bad")));
        let _ = session.submit(pek_sha()).await;
        session.clear();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.total, 0);
    }

    #[tokio::test]
    async fn test_resubmit_from_history() {
        let provider = MemoryProvider::new(FlightResponse::success(three_flights()));
        let session = session(provider.clone());
        session.submit(pek_sha()).await.unwrap();
        session
            .submit(SearchForm::one_way("CAN", "CTU", "2025-06-03"))
            .await
            .unwrap();

        let older = session.history().entries()[1].clone();
        session.resubmit(*older.id()).await.unwrap();

        assert_eq!(provider.calls(), 3);
        let history = session.history().entries();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].query().origin, "PEK");

        let missing = Uuid::new_v4();
        assert_eq!(
            session.resubmit(missing).await,
            Err(SearchError::UnknownHistoryEntry(missing))
        );
    }

    #[tokio::test]
    async fn test_available_airlines_ignore_filters() {
        let session = session(MemoryProvider::new(FlightResponse::success(three_flights())));
        session.submit(pek_sha()).await.unwrap();

        let mut criteria = FilterCriteria::default();
        criteria.toggle_airline("China Eastern");
        assert_eq!(session.display(&criteria, SortKey::Price).len(), 1);
        assert_eq!(
            session.available_airlines(),
            vec!["Air China", "China Eastern"]
        );
    }
}
