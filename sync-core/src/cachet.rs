use crate::error::{ApiError, SyncError};
use crate::identity::{IncidentIdentity, IncidentRef};
use crate::transition::Transition;
use alert_registry::AlertEvent;
use async_trait::async_trait;
use serde::Deserialize;

/// CachetHQ incident status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncidentStatus {
    Scheduled,
    Investigating,
    Identified,
    Watching,
    Fixed,
}

impl IncidentStatus {
    pub fn code(self) -> u8 {
        match self {
            IncidentStatus::Scheduled => 0,
            IncidentStatus::Investigating => 1,
            IncidentStatus::Identified => 2,
            IncidentStatus::Watching => 3,
            IncidentStatus::Fixed => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewIncident {
    pub name: String,
    pub message: String,
    pub status: IncidentStatus,
    pub visible: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncidentUpdate {
    pub message: String,
    pub status: IncidentStatus,
}

/// Single-attempt access to the status page incidents.
#[async_trait]
pub trait IncidentApi: Send + Sync + 'static {
    async fn create_incident(&self, incident: &NewIncident) -> Result<IncidentRef, ApiError>;

    async fn update_incident(
        &self,
        incident: IncidentRef,
        update: &IncidentUpdate,
    ) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct CreatedIncident {
    id: u64,
}

/// CachetHQ API v1 client. TLS trust and timeouts are whatever the
/// injected `reqwest::Client` was built with.
#[derive(Clone)]
pub struct CachetClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CachetClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn incidents_url(&self) -> String {
        format!("{}/api/v1/incidents", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request
            .header("X-Cachet-Token", &self.token)
            .send()
            .await
            .map_err(classify)?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status, body })
    }
}

fn classify(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(err.to_string())
    } else if err.is_connect() {
        ApiError::Connect(err.to_string())
    } else {
        ApiError::Transport(err.to_string())
    }
}

#[async_trait]
impl IncidentApi for CachetClient {
    async fn create_incident(&self, incident: &NewIncident) -> Result<IncidentRef, ApiError> {
        let body = serde_json::json!({
            "name": incident.name,
            "message": incident.message,
            "status": incident.status.code(),
            "visible": u8::from(incident.visible),
        });
        let response = self
            .send(self.http.post(self.incidents_url()).json(&body))
            .await?;
        let created: Envelope<CreatedIncident> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(IncidentRef(created.data.id))
    }

    async fn update_incident(
        &self,
        incident: IncidentRef,
        update: &IncidentUpdate,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "message": update.message,
            "status": update.status.code(),
        });
        let url = format!("{}/{incident}", self.incidents_url());
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }
}

/// Carries out `transition` for `event` and records the result in `entry`.
///
/// The entry only changes once CachetHQ confirmed the call.
pub async fn apply(
    api: &dyn IncidentApi,
    transition: Transition,
    event: &AlertEvent,
    entry: &mut IncidentIdentity,
    visible: bool,
) -> Result<(), SyncError> {
    let failed = |reason: ApiError| SyncError::RemoteSyncFailure {
        identity: event.identity.clone(),
        action: transition,
        reason,
    };

    match transition {
        Transition::NoOp => Ok(()),
        Transition::CreateIncident => {
            let incident = NewIncident {
                name: event.identity.clone(),
                message: event.summary.clone(),
                status: IncidentStatus::Investigating,
                visible,
            };
            let created = api.create_incident(&incident).await.map_err(failed)?;
            entry.incident_ref = Some(created);
            Ok(())
        }
        Transition::UpdateIncident | Transition::ResolveIncident => {
            let Some(incident) = entry.incident_ref else {
                tracing::warn!(identity = %event.identity, %transition, "no open incident to act on");
                return Ok(());
            };
            let status = if transition == Transition::ResolveIncident {
                IncidentStatus::Fixed
            } else {
                IncidentStatus::Investigating
            };
            let update = IncidentUpdate {
                message: event.summary.clone(),
                status,
            };
            api.update_incident(incident, &update)
                .await
                .map_err(failed)?;
            if transition == Transition::ResolveIncident {
                entry.incident_ref = None;
            }
            Ok(())
        }
    }
}
