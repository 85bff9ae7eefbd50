//! Debounced place search.
//!
//! Each submitted query aborts the pending dispatch and schedules a new one after the
//! debounce interval, so only the last query of a burst reaches the completer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use weatherwise_core::SearchConfig;

use crate::location::MapRegion;
use crate::types::Coordinate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("Search failed: {0}")]
    SearchFailed(String),
    #[error("No results")]
    NoResults,
    #[error("Completer failed: {0}")]
    CompleterFailed(String),
}

/// One suggestion for a partially typed query
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceCompletion {
    pub title: String,
    pub subtitle: String,
    /// Known up front for some backends; otherwise found by [`PlaceCompleter::resolve`]
    pub coordinate: Option<Coordinate>,
}

/// A selected place, ready to centre the map on
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlace {
    pub name: String,
    pub coordinate: Coordinate,
    pub region: MapRegion,
}

impl ResolvedPlace {
    pub fn new(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            name: name.into(),
            coordinate,
            region: MapRegion::around(coordinate),
        }
    }
}

#[async_trait]
pub trait PlaceCompleter: Send + Sync {
    async fn complete(&self, query: &str) -> Result<Vec<PlaceCompletion>, SearchError>;
    async fn resolve(&self, completion: &PlaceCompletion) -> Result<ResolvedPlace, SearchError>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchState {
    /// Query the results belong to
    pub query: String,
    pub results: Vec<PlaceCompletion>,
    pub searching: bool,
    pub error: Option<SearchError>,
}

pub struct SearchDebouncer {
    completer: Arc<dyn PlaceCompleter>,
    delay: Duration,
    state: Arc<watch::Sender<SearchState>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SearchDebouncer {
    pub fn new(completer: Arc<dyn PlaceCompleter>, delay: Duration) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            completer,
            delay,
            state: Arc::new(state),
            pending: Mutex::new(None),
        }
    }

    pub fn from_config(completer: Arc<dyn PlaceCompleter>, config: &SearchConfig) -> Self {
        Self::new(completer, Duration::from_millis(config.debounce_ms))
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    /// Submit the current search text. Must be called within a tokio runtime.
    pub fn submit(&self, query: &str) {
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        if query.trim().is_empty() {
            self.state.send_replace(SearchState::default());
            return;
        }

        let query = query.to_string();
        let delay = self.delay;
        let completer = self.completer.clone();
        let state = self.state.clone();

        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Only finished results count as a duplicate; an aborted search left `searching` set
            let already_shown = {
                let current = state.borrow();
                current.query == query && !current.searching
            };
            if already_shown {
                tracing::trace!("Skipping duplicate search for {:?}", query);
                return;
            }

            state.send_modify(|s| {
                s.query = query.clone();
                s.searching = true;
                s.error = None;
            });
            tracing::debug!("Searching places for {:?}", query);

            let next = match completer.complete(&query).await {
                Ok(completions) => {
                    let results = rank(completions);
                    let error = results.is_empty().then_some(SearchError::NoResults);
                    SearchState {
                        query,
                        results,
                        searching: false,
                        error,
                    }
                }
                Err(e) => {
                    tracing::warn!("Place search failed: {}", e);
                    SearchState {
                        query,
                        results: Vec::new(),
                        searching: false,
                        error: Some(e),
                    }
                }
            };
            state.send_replace(next);
        }));
    }

    /// Resolve a selected completion into a coordinate and map region
    pub async fn select(&self, completion: &PlaceCompletion) -> Result<ResolvedPlace, SearchError> {
        let place = self.completer.resolve(completion).await?;
        tracing::info!("Selected {} at {}", place.name, place.coordinate);
        Ok(place)
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }
}

/// Drop untitled completions and order the rest by title
fn rank(mut completions: Vec<PlaceCompletion>) -> Vec<PlaceCompletion> {
    completions.retain(|c| !c.title.trim().is_empty());
    completions.sort_by(|a, b| a.title.cmp(&b.title));
    completions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingCompleter {
        calls: Mutex<Vec<String>>,
        count: AtomicUsize,
        latency: Duration,
    }

    impl RecordingCompleter {
        fn new() -> Arc<Self> {
            Self::with_latency(Duration::ZERO)
        }

        fn with_latency(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                count: AtomicUsize::new(0),
                latency,
            })
        }
    }

    #[async_trait]
    impl PlaceCompleter for RecordingCompleter {
        async fn complete(&self, query: &str) -> Result<Vec<PlaceCompletion>, SearchError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().push(query.to_string());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if query == "fail" {
                return Err(SearchError::CompleterFailed("offline".into()));
            }
            Ok(vec![
                PlaceCompletion { title: format!("{} Zeta", query), subtitle: String::new(), coordinate: None },
                PlaceCompletion { title: "  ".into(), subtitle: "untitled".into(), coordinate: None },
                PlaceCompletion { title: format!("{} Alpha", query), subtitle: String::new(), coordinate: None },
            ])
        }

        async fn resolve(&self, completion: &PlaceCompletion) -> Result<ResolvedPlace, SearchError> {
            Ok(ResolvedPlace::new(completion.title.clone(), Coordinate::new(1.0, 1.0)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_dispatches_only_last_query() {
        let completer = RecordingCompleter::new();
        let debouncer = SearchDebouncer::new(completer.clone(), Duration::from_millis(200));

        for query in ["l", "lo", "lon", "lond", "london"] {
            debouncer.submit(query);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(*completer.calls.lock(), vec!["london".to_string()]);
        let state = debouncer.state();
        assert_eq!(state.query, "london");
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.results[0].title, "london Alpha");
        assert!(!state.searching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_query_is_skipped() {
        let completer = RecordingCompleter::new();
        let debouncer = SearchDebouncer::new(completer.clone(), Duration::from_millis(200));

        debouncer.submit("paris");
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.submit("paris");
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(completer.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requery_after_aborted_search_recovers() {
        let completer = RecordingCompleter::with_latency(Duration::from_millis(500));
        let debouncer = SearchDebouncer::new(completer.clone(), Duration::from_millis(200));

        // "paris" is in flight when the edit aborts it
        debouncer.submit("paris");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(debouncer.state().searching);
        debouncer.submit("pari");
        tokio::time::sleep(Duration::from_millis(50)).await;
        debouncer.submit("paris");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let state = debouncer.state();
        assert_eq!(state.query, "paris");
        assert!(!state.searching);
        assert_eq!(state.results.len(), 2);
        assert_eq!(*completer.calls.lock(), vec!["paris".to_string(), "paris".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returning_to_shown_query_after_aborted_edit() {
        let completer = RecordingCompleter::with_latency(Duration::from_millis(500));
        let debouncer = SearchDebouncer::new(completer.clone(), Duration::from_millis(200));

        debouncer.submit("rome");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!debouncer.state().searching);

        // "romeo" starts searching, then the user goes back to "rome"
        debouncer.submit("romeo");
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.submit("rome");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let state = debouncer.state();
        assert_eq!(state.query, "rome");
        assert!(!state.searching);
        assert_eq!(state.results[0].title, "rome Alpha");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_query_clears_immediately() {
        let completer = RecordingCompleter::new();
        let debouncer = SearchDebouncer::new(completer.clone(), Duration::from_millis(200));

        debouncer.submit("rome");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!debouncer.state().results.is_empty());

        debouncer.submit("");
        assert_eq!(debouncer.state(), SearchState::default());

        // Clearing resets duplicate detection
        debouncer.submit("rome");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(completer.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completer_error_is_published() {
        let completer = RecordingCompleter::new();
        let debouncer = SearchDebouncer::new(completer, Duration::from_millis(200));

        debouncer.submit("fail");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let state = debouncer.state();
        assert_eq!(state.error, Some(SearchError::CompleterFailed("offline".into())));
        assert!(state.results.is_empty());
    }

    #[tokio::test]
    async fn test_select_resolves_region() {
        let debouncer = SearchDebouncer::new(RecordingCompleter::new(), Duration::from_millis(200));
        let completion = PlaceCompletion { title: "Here".into(), subtitle: String::new(), coordinate: None };

        let place = debouncer.select(&completion).await.unwrap();
        assert_eq!(place.region.center, Coordinate::new(1.0, 1.0));
        assert_eq!(place.region.longitude_delta, 0.02);
    }

    #[test]
    fn test_rank_filters_and_sorts() {
        let ranked = rank(vec![
            PlaceCompletion { title: "b".into(), subtitle: String::new(), coordinate: None },
            PlaceCompletion { title: "".into(), subtitle: String::new(), coordinate: None },
            PlaceCompletion { title: "a".into(), subtitle: String::new(), coordinate: None },
        ]);
        let titles: Vec<_> = ranked.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }
}
