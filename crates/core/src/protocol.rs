//! WebSocket protocol between the embedded SDK and the gateway.
//!
//! One connection carries two event streams. Every text frame is an
//! envelope `{ "event": "client-message" | "server-message", "payload": ... }`
//! whose payload is `{ "kind": <discriminant>, "data": <payload> }`.
//! The set of kinds is the protocol surface; changing it bumps
//! [`PROTOCOL_NAMESPACE`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attributes::Attributes;
use crate::client_data::{TrackCondition, WaitTimerCondition};
use crate::session::SdkContentSession;
use crate::types::{ConditionId, ContentId, SessionId, VersionId};

/// Versioned namespace the gateway is mounted under.
pub const PROTOCOL_NAMESPACE: &str = "/v2";

pub const CLIENT_MESSAGE_EVENT: &str = "client-message";
pub const SERVER_MESSAGE_EVENT: &str = "server-message";

// ---------------------------------------------------------------------------
// Client -> server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertUserData {
    pub external_user_id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertCompanyData {
    pub external_company_id: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub membership_attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventData {
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartContentData {
    pub content_id: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_cvid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    #[default]
    UserClosed,
    Completed,
    HideRules,
    Replaced,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserClosed => "user_closed",
            Self::Completed => "completed",
            Self::HideRules => "hide_rules",
            Self::Replaced => "replaced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndContentData {
    pub session_id: SessionId,
    #[serde(default)]
    pub reason: EndReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoToStepData {
    pub session_id: SessionId,
    pub step_cvid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerQuestionData {
    pub session_id: SessionId,
    pub question_cvid: String,
    #[serde(default)]
    pub question_name: String,
    #[serde(default)]
    pub answer: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickChecklistTaskData {
    pub session_id: SessionId,
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: SessionId,
}

/// Browser-side facts the server cannot observe on its own.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TooltipTargetMissingData {
    pub session_id: SessionId,
    pub step_cvid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleClientConditionData {
    pub condition_id: ConditionId,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FireWaitTimerData {
    pub version_id: VersionId,
    pub condition_id: ConditionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherData {
    pub content_id: ContentId,
    pub version_id: VersionId,
}

/// A message sent by the SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ClientMessage {
    UpsertUser(UpsertUserData),
    UpsertCompany(UpsertCompanyData),
    TrackEvent(TrackEventData),
    StartContent(StartContentData),
    EndContent(EndContentData),
    GoToStep(GoToStepData),
    AnswerQuestion(AnswerQuestionData),
    ClickChecklistTask(ClickChecklistTaskData),
    HideChecklist(SessionRef),
    ShowChecklist(SessionRef),
    UpdateClientContext(ClientContext),
    ReportTooltipTargetMissing(TooltipTargetMissingData),
    ToggleClientCondition(ToggleClientConditionData),
    FireConditionWaitTimer(FireWaitTimerData),
    ActivateLauncher(LauncherData),
    DismissLauncher(LauncherData),
    BeginBatch,
    EndBatch,
    EndAllContent,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpsertUser(_) => "UpsertUser",
            Self::UpsertCompany(_) => "UpsertCompany",
            Self::TrackEvent(_) => "TrackEvent",
            Self::StartContent(_) => "StartContent",
            Self::EndContent(_) => "EndContent",
            Self::GoToStep(_) => "GoToStep",
            Self::AnswerQuestion(_) => "AnswerQuestion",
            Self::ClickChecklistTask(_) => "ClickChecklistTask",
            Self::HideChecklist(_) => "HideChecklist",
            Self::ShowChecklist(_) => "ShowChecklist",
            Self::UpdateClientContext(_) => "UpdateClientContext",
            Self::ReportTooltipTargetMissing(_) => "ReportTooltipTargetMissing",
            Self::ToggleClientCondition(_) => "ToggleClientCondition",
            Self::FireConditionWaitTimer(_) => "FireConditionWaitTimer",
            Self::ActivateLauncher(_) => "ActivateLauncher",
            Self::DismissLauncher(_) => "DismissLauncher",
            Self::BeginBatch => "BeginBatch",
            Self::EndBatch => "EndBatch",
            Self::EndAllContent => "EndAllContent",
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceGoToStepData {
    pub session_id: SessionId,
    pub step_cvid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRef {
    pub condition_id: ConditionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistTaskCompletedData {
    pub session_id: SessionId,
    pub task_id: String,
}

/// A message pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ServerMessage {
    SetFlowSession(SdkContentSession),
    SetChecklistSession(SdkContentSession),
    UnsetFlowSession(SessionRef),
    UnsetChecklistSession(SessionRef),
    ForceGoToStep(ForceGoToStepData),
    TrackClientCondition(TrackCondition),
    UntrackClientCondition(ConditionRef),
    StartConditionWaitTimer(WaitTimerCondition),
    CancelConditionWaitTimer(ConditionRef),
    ChecklistTaskCompleted(ChecklistTaskCompletedData),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetFlowSession(_) => "SetFlowSession",
            Self::SetChecklistSession(_) => "SetChecklistSession",
            Self::UnsetFlowSession(_) => "UnsetFlowSession",
            Self::UnsetChecklistSession(_) => "UnsetChecklistSession",
            Self::ForceGoToStep(_) => "ForceGoToStep",
            Self::TrackClientCondition(_) => "TrackClientCondition",
            Self::UntrackClientCondition(_) => "UntrackClientCondition",
            Self::StartConditionWaitTimer(_) => "StartConditionWaitTimer",
            Self::CancelConditionWaitTimer(_) => "CancelConditionWaitTimer",
            Self::ChecklistTaskCompleted(_) => "ChecklistTaskCompleted",
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// A text frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Frame {
    #[serde(rename = "client-message")]
    Client(ClientMessage),
    #[serde(rename = "server-message")]
    Server(ServerMessage),
}

/// Why an inbound frame was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected event '{0}' for this direction")]
    UnexpectedEvent(&'static str),
}

impl Frame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode a frame received by the gateway.
pub fn decode_client_frame(text: &str) -> Result<ClientMessage, ProtocolError> {
    match serde_json::from_str::<Frame>(text)? {
        Frame::Client(message) => Ok(message),
        Frame::Server(_) => Err(ProtocolError::UnexpectedEvent(SERVER_MESSAGE_EVENT)),
    }
}

/// Decode a frame received by the SDK.
pub fn decode_server_frame(text: &str) -> Result<ServerMessage, ProtocolError> {
    match serde_json::from_str::<Frame>(text)? {
        Frame::Server(message) => Ok(message),
        Frame::Client(_) => Err(ProtocolError::UnexpectedEvent(CLIENT_MESSAGE_EVENT)),
    }
}
