use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_LABEL_NAME: &str = "alertname";

/// Envelope of an Alertmanager webhook notification (version 4).
///
/// Only `alerts` is required; the grouping fields are accepted so that a
/// well-formed notification never fails to decode because of them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub alerts: Vec<serde_json::Value>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default, rename = "externalURL")]
    pub external_url: Option<String>,
}

/// One entry of `alerts`, decoded on its own so a bad record only costs itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub status: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// A single normalized alert state, ready to be matched against an incident.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub identity: String,
    pub status: AlertStatus,
    pub summary: String,
    pub labels: BTreeMap<String, String>,
}

/// The body could not be read as an alert batch at all.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("malformed webhook payload: {0}")]
pub struct MalformedPayload(pub String);

/// Why a single alert of an otherwise valid batch was skipped.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    #[error("malformed alert record: {0}")]
    MalformedAlert(String),
    #[error("unknown alert status '{status}' for '{identity}'")]
    UnknownAlertStatus { identity: String, status: String },
    #[error("alert is missing the '{0}' identity label")]
    MissingIdentityLabel(String),
}

impl AlertError {
    /// Identity of the rejected alert, when it got far enough to have one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            AlertError::UnknownAlertStatus { identity, .. } => Some(identity.as_str()),
            AlertError::MalformedAlert(_) | AlertError::MissingIdentityLabel(_) => None,
        }
    }
}

/// Decodes a webhook body into one result per alert, in payload order.
pub fn decode_batch(
    raw: &[u8],
    label_name: &str,
) -> Result<Vec<Result<AlertEvent, AlertError>>, MalformedPayload> {
    let message: WebhookMessage =
        serde_json::from_slice(raw).map_err(|e| MalformedPayload(e.to_string()))?;

    Ok(message
        .alerts
        .into_iter()
        .map(|value| {
            let record: AlertRecord = serde_json::from_value(value)
                .map_err(|e| AlertError::MalformedAlert(e.to_string()))?;
            normalize_alert(record, label_name)
        })
        .collect())
}

pub fn normalize_alert(record: AlertRecord, label_name: &str) -> Result<AlertEvent, AlertError> {
    let identity = record
        .labels
        .get(label_name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AlertError::MissingIdentityLabel(label_name.to_string()))?
        .to_string();

    let status = parse_status(&record.status).ok_or_else(|| AlertError::UnknownAlertStatus {
        identity: identity.clone(),
        status: record.status.clone(),
    })?;

    let summary = record
        .annotations
        .get("summary")
        .or_else(|| record.annotations.get("description"))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("{identity} is {status}"));

    Ok(AlertEvent {
        identity,
        status,
        summary,
        labels: record.labels,
    })
}

fn parse_status(value: &str) -> Option<AlertStatus> {
    match value.to_lowercase().as_str() {
        "firing" => Some(AlertStatus::Firing),
        "resolved" => Some(AlertStatus::Resolved),
        _ => None,
    }
}
