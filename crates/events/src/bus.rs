//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`GatewayEvent`]s (analytics facts produced while
//! serving SDK connections) to background consumers such as persistence.
//! It is designed to be shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use waypoint_core::types::{ContentId, EnvironmentId, SessionId};

// ---------------------------------------------------------------------------
// GatewayEvent
// ---------------------------------------------------------------------------

/// Closed set of analytics event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEventKind {
    ContentStarted,
    ContentEnded,
    StepSeen,
    EventTracked,
    QuestionAnswered,
    TooltipTargetMissing,
    ChecklistTaskClicked,
    ChecklistTaskCompleted,
    ChecklistHidden,
    ChecklistShown,
    LauncherActivated,
    LauncherDismissed,
}

impl GatewayEventKind {
    /// Dot-separated name used as the persisted event code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentStarted => "content.started",
            Self::ContentEnded => "content.ended",
            Self::StepSeen => "step.seen",
            Self::EventTracked => "event.tracked",
            Self::QuestionAnswered => "question.answered",
            Self::TooltipTargetMissing => "tooltip.target_missing",
            Self::ChecklistTaskClicked => "checklist.task_clicked",
            Self::ChecklistTaskCompleted => "checklist.task_completed",
            Self::ChecklistHidden => "checklist.hidden",
            Self::ChecklistShown => "checklist.shown",
            Self::LauncherActivated => "launcher.activated",
            Self::LauncherDismissed => "launcher.dismissed",
        }
    }
}

/// An analytics fact about one end user in one environment.
///
/// Constructed via [`GatewayEvent::new`] and enriched with the builder
/// methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub kind: GatewayEventKind,
    pub environment_id: EnvironmentId,
    pub external_user_id: Option<String>,
    pub session_id: Option<SessionId>,
    pub content_id: Option<ContentId>,
    /// Integrator-defined event name for [`GatewayEventKind::EventTracked`].
    pub event_name: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl GatewayEvent {
    pub fn new(kind: GatewayEventKind, environment_id: impl Into<EnvironmentId>) -> Self {
        Self {
            kind,
            environment_id: environment_id.into(),
            external_user_id: None,
            session_id: None,
            content_id: None,
            event_name: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, external_user_id: Option<String>) -> Self {
        self.external_user_id = external_user_id;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>, content_id: impl Into<ContentId>) -> Self {
        self.session_id = Some(session_id.into());
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_content(mut self, content_id: impl Into<ContentId>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Code under which this event is counted by `event` conditions.
    pub fn code(&self) -> &str {
        self.event_name.as_deref().unwrap_or(self.kind.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: GatewayEvent) {
        tracing::trace!(kind = event.kind.as_str(), "Publishing gateway event");
        // Zero receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
