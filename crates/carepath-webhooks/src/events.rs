//! Domain events that can be delivered to webhook subscribers.
//!
//! Each event tag has its own strongly typed payload. Publishing wraps the
//! payload in a [`WebhookPayload`] envelope which is serialized exactly once
//! and stored verbatim on every delivery it fans out to.

use std::fmt;

use carepath_core::{EventId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Recognized event tags.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum WebhookEventType {
    #[serde(rename = "journey.stage_changed")]
    JourneyStageChanged,
    #[serde(rename = "survey.completed")]
    SurveyCompleted,
    #[serde(rename = "churn_risk.calculated")]
    ChurnRiskCalculated,
    #[serde(rename = "patient.registered")]
    PatientRegistered,
    #[serde(rename = "appointment.scheduled")]
    AppointmentScheduled,
    #[serde(rename = "appointment.cancelled")]
    AppointmentCancelled,
}

impl WebhookEventType {
    /// Wire form of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JourneyStageChanged => "journey.stage_changed",
            Self::SurveyCompleted => "survey.completed",
            Self::ChurnRiskCalculated => "churn_risk.calculated",
            Self::PatientRegistered => "patient.registered",
            Self::AppointmentScheduled => "appointment.scheduled",
            Self::AppointmentCancelled => "appointment.cancelled",
        }
    }

    /// Parse the wire form. Returns `None` for unrecognized tags.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|et| et.as_str() == s)
    }

    pub fn all() -> &'static [WebhookEventType] {
        &[
            Self::JourneyStageChanged,
            Self::SurveyCompleted,
            Self::ChurnRiskCalculated,
            Self::PatientRegistered,
            Self::AppointmentScheduled,
            Self::AppointmentCancelled,
        ]
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::JourneyStageChanged => "journey",
            Self::SurveyCompleted => "survey",
            Self::ChurnRiskCalculated => "churn_risk",
            Self::PatientRegistered => "patient",
            Self::AppointmentScheduled | Self::AppointmentCancelled => "appointment",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::JourneyStageChanged => "A patient moved to a different journey stage",
            Self::SurveyCompleted => "A patient submitted a survey response",
            Self::ChurnRiskCalculated => "A churn risk score was computed for a patient",
            Self::PatientRegistered => "A new patient was registered",
            Self::AppointmentScheduled => "An appointment was booked",
            Self::AppointmentCancelled => "An appointment was cancelled",
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JourneyStageChanged {
    pub patient_id: Uuid,
    pub journey_id: Uuid,
    pub from_stage: Option<String>,
    pub to_stage: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SurveyCompleted {
    pub patient_id: Uuid,
    pub survey_id: Uuid,
    pub response_id: Uuid,
    /// Normalized score, when the survey is scored (e.g. NPS).
    pub score: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChurnRiskCalculated {
    pub patient_id: Uuid,
    /// Probability of churn in `0.0..=1.0`.
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub factors: Vec<String>,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PatientRegistered {
    pub patient_id: Uuid,
    pub source: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AppointmentScheduled {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AppointmentCancelled {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

/// A publishable domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data")]
pub enum WebhookEvent {
    #[serde(rename = "journey.stage_changed")]
    JourneyStageChanged(JourneyStageChanged),
    #[serde(rename = "survey.completed")]
    SurveyCompleted(SurveyCompleted),
    #[serde(rename = "churn_risk.calculated")]
    ChurnRiskCalculated(ChurnRiskCalculated),
    #[serde(rename = "patient.registered")]
    PatientRegistered(PatientRegistered),
    #[serde(rename = "appointment.scheduled")]
    AppointmentScheduled(AppointmentScheduled),
    #[serde(rename = "appointment.cancelled")]
    AppointmentCancelled(AppointmentCancelled),
}

impl WebhookEvent {
    pub fn event_type(&self) -> WebhookEventType {
        match self {
            Self::JourneyStageChanged(_) => WebhookEventType::JourneyStageChanged,
            Self::SurveyCompleted(_) => WebhookEventType::SurveyCompleted,
            Self::ChurnRiskCalculated(_) => WebhookEventType::ChurnRiskCalculated,
            Self::PatientRegistered(_) => WebhookEventType::PatientRegistered,
            Self::AppointmentScheduled(_) => WebhookEventType::AppointmentScheduled,
            Self::AppointmentCancelled(_) => WebhookEventType::AppointmentCancelled,
        }
    }

    /// The variant payload as a JSON value.
    pub fn data(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::JourneyStageChanged(p) => serde_json::to_value(p),
            Self::SurveyCompleted(p) => serde_json::to_value(p),
            Self::ChurnRiskCalculated(p) => serde_json::to_value(p),
            Self::PatientRegistered(p) => serde_json::to_value(p),
            Self::AppointmentScheduled(p) => serde_json::to_value(p),
            Self::AppointmentCancelled(p) => serde_json::to_value(p),
        }
    }
}

/// Envelope sent as the request body of every delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookPayload {
    #[schema(value_type = Uuid)]
    pub event_id: EventId,
    pub event_type: WebhookEventType,
    #[schema(value_type = Uuid)]
    pub tenant_id: TenantId,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn new(
        event_id: EventId,
        tenant_id: TenantId,
        timestamp: DateTime<Utc>,
        event: &WebhookEvent,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id,
            event_type: event.event_type(),
            tenant_id,
            timestamp,
            data: event.data()?,
        })
    }

    /// Canonical body bytes. Object keys inside `data` are emitted in sorted order.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
