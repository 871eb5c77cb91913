use crate::cachet::{self, IncidentApi};
use crate::error::SyncError;
use crate::identity::IdentityCache;
use crate::transition::{self, Transition};
use alert_registry::{decode_batch, AlertEvent, DEFAULT_LABEL_NAME};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// Label whose value identifies the incident an alert belongs to.
    pub label_name: String,
    /// Visibility of newly created incidents. Later updates leave it alone.
    pub visible: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            label_name: DEFAULT_LABEL_NAME.into(),
            visible: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventOutcome {
    /// Position of the alert in the webhook payload.
    pub index: usize,
    /// `None` when the alert was rejected before its identity label was read.
    pub identity: Option<String>,
    pub result: Result<Transition, SyncError>,
}

impl EventOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<EventOutcome>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(EventOutcome::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EventOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn has_remote_failures(&self) -> bool {
        self.failures()
            .any(|o| matches!(&o.result, Err(err) if err.is_remote()))
    }
}

pub struct Synchronizer {
    api: Arc<dyn IncidentApi>,
    cache: Arc<IdentityCache>,
    settings: SyncSettings,
}

impl Synchronizer {
    pub fn new(api: Arc<dyn IncidentApi>, cache: Arc<IdentityCache>, settings: SyncSettings) -> Self {
        Self {
            api,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Processes one webhook body. Only an undecodable body fails the call;
    /// everything else is reported per alert, in payload order.
    pub async fn sync(&self, raw: &[u8]) -> Result<BatchReport, SyncError> {
        let items = decode_batch(raw, &self.settings.label_name)?;
        tracing::debug!(alerts = items.len(), "decoded webhook batch");

        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let outcome = match item {
                Ok(event) => EventOutcome {
                    index,
                    identity: Some(event.identity.clone()),
                    result: self.sync_event(&event).await,
                },
                Err(err) => {
                    tracing::warn!(index, error = %err, "skipping alert");
                    EventOutcome {
                        index,
                        identity: err.identity().map(str::to_string),
                        result: Err(err.into()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(BatchReport { outcomes })
    }

    pub async fn sync_event(&self, event: &AlertEvent) -> Result<Transition, SyncError> {
        let mut entry = self.cache.resolve(&event.identity).await;
        let decision = transition::decide(entry.incident_ref.as_ref(), event.status);

        let applied = cachet::apply(
            self.api.as_ref(),
            decision,
            event,
            &mut entry,
            self.settings.visible,
        )
        .await;
        self.cache.release(entry);

        match applied {
            Ok(()) => {
                tracing::info!(
                    identity = %event.identity,
                    status = %event.status,
                    transition = %decision,
                    "alert synchronized"
                );
                Ok(decision)
            }
            Err(err) => {
                tracing::error!(identity = %event.identity, error = %err, "alert not synchronized");
                Err(err)
            }
        }
    }
}
