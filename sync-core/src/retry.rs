use crate::cachet::{IncidentApi, IncidentUpdate, NewIncident};
use crate::error::ApiError;
use crate::identity::IncidentRef;
use async_trait::async_trait;
use exponential_backoff::Backoff;
use std::future::Future;
use std::time::Duration;

/// Wraps an [`IncidentApi`] and re-attempts failed calls with exponential backoff.
///
/// The wrapped adapter stays single-attempt; this only decides whether to call
/// it again. After `retries` extra attempts the last error is returned, and
/// `retries == 0` is a plain pass-through. Creation is only repeated when the
/// failure shows CachetHQ never acted on it, so a retry cannot open a second
/// incident. Updates are idempotent and retry on any failure.
pub struct Retrying<A> {
    inner: A,
    retries: u32,
    backoff: Option<Backoff>,
    max_delay: Duration,
}

impl<A: IncidentApi> Retrying<A> {
    pub fn new(inner: A, retries: u32) -> Self {
        let max_delay = Duration::from_secs(5);
        // Backoff rejects a zero retry count.
        let backoff = (retries > 0)
            .then(|| Backoff::new(retries, Duration::from_millis(100), Some(max_delay)));
        Self {
            inner,
            retries,
            backoff,
            max_delay,
        }
    }

    pub fn with_delays(mut self, min: Duration, max: Duration) -> Self {
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.set_min(min);
            backoff.set_max(Some(max));
        }
        self.max_delay = max;
        self
    }

    async fn attempt<T, F, Fut>(
        &self,
        what: &str,
        retryable: fn(&ApiError) -> bool,
        mut call: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
    {
        let mut failures = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if failures >= self.retries || !retryable(&err) => return Err(err),
                Err(err) => {
                    failures += 1;
                    let delay = self
                        .backoff
                        .as_ref()
                        .and_then(|b| b.next(failures))
                        .unwrap_or(self.max_delay);
                    tracing::warn!(
                        call = what,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "cachethq call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl<A: IncidentApi> IncidentApi for Retrying<A> {
    async fn create_incident(&self, incident: &NewIncident) -> Result<IncidentRef, ApiError> {
        let inner = &self.inner;
        self.attempt("create_incident", ApiError::is_unapplied, move || {
            inner.create_incident(incident)
        })
        .await
    }

    async fn update_incident(
        &self,
        incident: IncidentRef,
        update: &IncidentUpdate,
    ) -> Result<(), ApiError> {
        let inner = &self.inner;
        self.attempt("update_incident", |_| true, move || {
            inner.update_incident(incident, update)
        })
        .await
    }
}
