//! Query coalescer folding concurrent last-value lookups into one query
//!
//! An [`EventBatch`] is created per batch or group request with the number of
//! participants that may ask for a last value. Every participant resolves
//! exactly once, either by querying or by skipping. When the last one
//! resolves, a single time-series query over the union of all registered
//! columns is issued and every waiting caller receives its own rows.

use crate::error::CommandError;
use crate::timeseries::{QueryRequest, QueryResponse, TimeSeries};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error};

type SharedRows = Result<Arc<Vec<QueryResponse>>, String>;

#[derive(Default)]
struct BatchState {
    /// Participants that have neither queried nor skipped yet
    outstanding: usize,
    requests: Vec<QueryRequest>,
    /// Request indices per (device, service)
    index: HashMap<(String, String), Vec<usize>>,
    fired: bool,
}

struct Inner {
    token: String,
    timeseries: Arc<dyn TimeSeries>,
    state: Mutex<BatchState>,
    rows: watch::Sender<Option<SharedRows>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark one participant as decided, firing if it was the last
    fn resolve_one(self: &Arc<Self>) {
        let requests = {
            let mut state = self.lock();
            if state.outstanding == 0 {
                error!("event batch resolved more often than its participant count");
                return;
            }
            state.outstanding -= 1;
            if state.outstanding > 0 {
                return;
            }
            if state.fired {
                error!("event batch already fired, rejecting second query");
                return;
            }
            state.fired = true;
            state.requests.clone()
        };

        // callers registered no columns (or nobody queried): answer without the store
        if requests.is_empty() {
            self.rows.send_replace(Some(Ok(Arc::new(Vec::new()))));
            return;
        }

        debug!("event batch firing one query for {} columns", requests.len());
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let rows = inner
                .timeseries
                .query(&inner.token, &requests)
                .await
                .map(Arc::new)
                .map_err(|e| e.to_string());
            inner.rows.send_replace(Some(rows));
        });
    }

    /// Grow the participant count for an undecided participant
    fn add_outstanding(&self, extra: usize) {
        self.lock().outstanding += extra;
    }
}

/// Shared coalescing state for one top-level request
#[derive(Clone)]
pub struct EventBatch {
    inner: Arc<Inner>,
}

impl EventBatch {
    /// Create a batch expecting `expected_call_count` participants
    pub fn new(token: &str, timeseries: Arc<dyn TimeSeries>, expected_call_count: usize) -> Self {
        let (rows, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                token: token.to_string(),
                timeseries,
                state: Mutex::new(BatchState {
                    outstanding: expected_call_count,
                    ..Default::default()
                }),
                rows,
            }),
        }
    }

    /// Hand out a participant handle for one of the expected calls
    pub fn participant(&self) -> Participant {
        Participant {
            batch: Some(self.clone()),
        }
    }

    /// Register `columns` for (device, service) and wait for the shared query
    ///
    /// Repeated calls for the same pair reuse the first registration.
    pub async fn query(
        &self,
        device_id: &str,
        service_id: &str,
        columns: &[String],
    ) -> Result<Vec<QueryResponse>, CommandError> {
        let (indices, mut rx) = {
            let mut guard = self.inner.lock();
            if guard.fired || guard.outstanding == 0 {
                return Err(CommandError::Internal("event batch already fired".into()));
            }
            let state = &mut *guard;
            let key = (device_id.to_string(), service_id.to_string());
            let indices = match state.index.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let start = state.requests.len();
                    state.requests.extend(
                        columns
                            .iter()
                            .map(|column| QueryRequest::new(device_id, service_id, column.clone())),
                    );
                    let fresh: Vec<usize> = (start..state.requests.len()).collect();
                    state.index.insert(key, fresh.clone());
                    fresh
                }
            };
            (indices, self.inner.rows.subscribe())
        };

        self.inner.resolve_one();

        let shared = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CommandError::Internal("event batch dropped before firing".into()))?
            .clone();

        let rows = match shared {
            Some(Ok(rows)) => rows,
            Some(Err(cause)) => return Err(CommandError::LastValue(cause)),
            None => return Err(CommandError::Internal("event batch produced no rows".into())),
        };

        indices
            .iter()
            .map(|&i| {
                rows.get(i).cloned().ok_or_else(|| {
                    CommandError::LastValue(format!(
                        "time-series returned {} rows, row {} missing",
                        rows.len(),
                        i
                    ))
                })
            })
            .collect()
    }

    /// Declare that one participant will not query
    pub fn skip(&self) {
        self.inner.resolve_one();
    }
}

/// One expected call of an [`EventBatch`]
///
/// Dropping an unused participant counts as a skip, so every code path that
/// does not end up on the last-value path keeps the count consistent.
pub struct Participant {
    batch: Option<EventBatch>,
}

impl Participant {
    pub async fn query(
        mut self,
        device_id: &str,
        service_id: &str,
        columns: &[String],
    ) -> Result<Vec<QueryResponse>, CommandError> {
        match self.batch.take() {
            Some(batch) => batch.query(device_id, service_id, columns).await,
            None => Err(CommandError::Internal("participant already resolved".into())),
        }
    }

    /// Replace this participant by `n` participants
    ///
    /// Used once a group request knows how many sub-commands it resolved to.
    pub fn fork(mut self, n: usize) -> Vec<Participant> {
        let Some(batch) = self.batch.take() else {
            return Vec::new();
        };
        if n == 0 {
            batch.skip();
            return Vec::new();
        }
        batch.inner.add_outstanding(n - 1);
        (0..n).map(|_| batch.participant()).collect()
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            batch.skip();
        }
    }
}
