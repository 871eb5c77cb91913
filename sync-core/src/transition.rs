use crate::identity::IncidentRef;
use alert_registry::AlertStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    CreateIncident,
    UpdateIncident,
    ResolveIncident,
    NoOp,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::CreateIncident => "create_incident",
            Transition::UpdateIncident => "update_incident",
            Transition::ResolveIncident => "resolve_incident",
            Transition::NoOp => "noop",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// At most one open incident per identity: a firing alert only creates when
/// nothing is open, and a resolved alert only acts on an open incident.
pub fn decide(current: Option<&IncidentRef>, status: AlertStatus) -> Transition {
    match (current, status) {
        (None, AlertStatus::Firing) => Transition::CreateIncident,
        (None, AlertStatus::Resolved) => Transition::NoOp,
        (Some(_), AlertStatus::Firing) => Transition::UpdateIncident,
        (Some(_), AlertStatus::Resolved) => Transition::ResolveIncident,
    }
}
