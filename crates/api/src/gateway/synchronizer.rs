//! Server-side session synchronization.
//!
//! The [`Synchronizer`] applies client messages to a draft
//! [`SocketClientData`] and records what has to happen next in [`Effects`]:
//! frames for the browser, signals for sibling tabs, analytics events and
//! room changes. It never talks to the socket itself, so every transition
//! can be driven and inspected without a live connection.
//!
//! After state-changing messages the synchronizer *refreshes*: hide rules of
//! active sessions are evaluated, empty slots are offered to published
//! content whose auto-start rules hold, checklist tasks are checked for
//! completion, and the set of conditions the browser must observe is
//! reconciled with what it is already observing.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use waypoint_core::attributes::{
    infer_definitions, merge_attributes, AttributeBizType, AttributeDefinition, Attributes,
};
use waypoint_core::client_data::{
    SocketClientData, SocketClientDataPatch, TrackCondition, WaitTimerCondition,
};
use waypoint_core::conditions::ids::flatten_leaves;
use waypoint_core::conditions::{
    evaluate_rules_conditions, is_conditions_actived, ConditionKind, ConditionType,
    EvaluationContext, EvaluationOptions, RulesCondition,
};
use waypoint_core::error::CoreError;
use waypoint_core::protocol::{
    AnswerQuestionData, ChecklistTaskCompletedData, ClickChecklistTaskData, ClientContext,
    ClientMessage, ConditionRef, EndContentData, EndReason, FireWaitTimerData, ForceGoToStepData,
    GoToStepData, LauncherData, ServerMessage, SessionRef, StartContentData,
    ToggleClientConditionData, TooltipTargetMissingData, TrackEventData, UpsertCompanyData,
    UpsertUserData,
};
use waypoint_core::session::{
    ContentSummary, ContentType, CurrentStep, ProjectRef, SdkContentSession, SessionSlot,
};
use waypoint_core::types::{ConditionId, Timestamp};
use waypoint_events::{GatewayEvent, GatewayEventKind};

use super::staged::StagedWrites;
use super::PeerSignal;
use crate::store::{
    start_content_lock_key, ContentStatePatch, EnvironmentRecord, PublishedContentRecord,
    StoreError, Stores,
};
use crate::ws::user_room;

/// Client clocks may fire a wait timer this much before its due time.
const WAIT_TIMER_GRACE_SECS: i64 = 1;

/// Why a message could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Storage failed; the whole transition is abandoned.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The message is invalid for the current state; only it is skipped.
    #[error(transparent)]
    Rejected(#[from] CoreError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Everything a transition wants done once it is committed.
#[derive(Debug, Default)]
pub struct Effects {
    /// Biz-store writes, flushed on commit.
    pub writes: StagedWrites,
    /// `(key, token)` locks taken by the transition, released after commit.
    pub held_locks: Vec<(String, String)>,
    pub messages: Vec<ServerMessage>,
    /// `(room, signal)` pairs for sibling connections.
    pub peer_signals: Vec<(String, PeerSignal)>,
    pub events: Vec<GatewayEvent>,
    pub rooms_to_join: Vec<String>,
    pub rooms_to_leave: Vec<String>,
    /// Set by messages after which targeting must be re-evaluated.
    pub needs_refresh: bool,
}

impl Effects {
    /// Effects for the next step of a transition. The step starts from the
    /// writes and locks staged so far so it can read and reuse them.
    pub fn fork(&self) -> Effects {
        Effects {
            writes: self.writes.clone(),
            held_locks: self.held_locks.clone(),
            ..Default::default()
        }
    }

    /// Take over a step forked from `self`.
    pub fn absorb(&mut self, other: Effects) {
        self.writes = other.writes;
        self.held_locks = other.held_locks;
        self.messages.extend(other.messages);
        self.peer_signals.extend(other.peer_signals);
        self.events.extend(other.events);
        self.rooms_to_join.extend(other.rooms_to_join);
        self.rooms_to_leave.extend(other.rooms_to_leave);
        self.needs_refresh |= other.needs_refresh;
    }
}

/// Conditions the browser must observe for the current state.
#[derive(Debug, Default, PartialEq)]
pub struct TrackingPlan {
    pub tracks: Vec<TrackCondition>,
    /// Wait timers that still have to fire.
    pub timers: Vec<WaitTimerCondition>,
    /// Every wait leaf that is still relevant, fired or not.
    pub wait_ids: HashSet<ConditionId>,
}

/// Applies client messages for one environment.
pub struct Synchronizer<'a> {
    stores: &'a Stores,
    environment: &'a EnvironmentRecord,
    lock_ttl_secs: u64,
}

fn set_message(slot: SessionSlot, session: SdkContentSession) -> ServerMessage {
    match slot {
        SessionSlot::Flow => ServerMessage::SetFlowSession(session),
        SessionSlot::Checklist => ServerMessage::SetChecklistSession(session),
    }
}

fn unset_message(slot: SessionSlot, session_id: String) -> ServerMessage {
    let session = SessionRef { session_id };
    match slot {
        SessionSlot::Flow => ServerMessage::UnsetFlowSession(session),
        SessionSlot::Checklist => ServerMessage::UnsetChecklistSession(session),
    }
}

fn session_not_found(session_id: &str) -> CoreError {
    CoreError::NotFound {
        entity: "Session",
        id: session_id.to_string(),
    }
}

fn require_user(data: &SocketClientData) -> Result<String, CoreError> {
    data.external_user_id
        .clone()
        .ok_or_else(|| CoreError::Validation("UpsertUser must be sent first".into()))
}

fn rules_hold(conditions: &[RulesCondition], ctx: &EvaluationContext) -> bool {
    is_conditions_actived(&evaluate_rules_conditions(
        conditions,
        ctx,
        &EvaluationOptions::default(),
    ))
}

fn is_auto_start_candidate(
    record: &PublishedContentRecord,
    slot: SessionSlot,
    ctx: &EvaluationContext,
) -> bool {
    record.content_type.slot() == Some(slot)
        && record.version.config.enabled_auto_start_rules
        && !ctx.content_state(&record.content_id).seen
}

impl<'a> Synchronizer<'a> {
    pub fn new(stores: &'a Stores, environment: &'a EnvironmentRecord, lock_ttl_secs: u64) -> Self {
        Self {
            stores,
            environment,
            lock_ttl_secs,
        }
    }

    fn event(&self, kind: GatewayEventKind, data: &SocketClientData) -> GatewayEvent {
        GatewayEvent::new(kind, self.environment.id.clone()).with_user(data.external_user_id.clone())
    }

    /// Apply one client message to `data`.
    ///
    /// Batch markers are the connection's concern and are ignored here.
    pub async fn apply(
        &self,
        data: &mut SocketClientData,
        message: ClientMessage,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        match message {
            ClientMessage::UpsertUser(d) => self.upsert_user(data, d, effects).await,
            ClientMessage::UpsertCompany(d) => self.upsert_company(data, d, effects).await,
            ClientMessage::TrackEvent(d) => {
                self.track_event(data, d, effects);
                Ok(())
            }
            ClientMessage::StartContent(d) => self.start_content(data, d, effects).await,
            ClientMessage::EndContent(d) => self.end_content(data, d, effects).await,
            ClientMessage::GoToStep(d) => self.go_to_step(data, d, effects),
            ClientMessage::AnswerQuestion(d) => self.answer_question(data, d, effects),
            ClientMessage::ClickChecklistTask(d) => self.click_checklist_task(data, d, effects),
            ClientMessage::HideChecklist(d) => self.checklist_visibility(data, d, false, effects),
            ClientMessage::ShowChecklist(d) => self.checklist_visibility(data, d, true, effects),
            ClientMessage::UpdateClientContext(d) => {
                self.update_client_context(data, d, effects);
                Ok(())
            }
            ClientMessage::ReportTooltipTargetMissing(d) => {
                self.tooltip_target_missing(data, d, effects)
            }
            ClientMessage::ToggleClientCondition(d) => {
                self.toggle_client_condition(data, d, effects);
                Ok(())
            }
            ClientMessage::FireConditionWaitTimer(d) => self.fire_wait_timer(data, d, effects),
            ClientMessage::ActivateLauncher(d) => self.launcher(data, d, true, effects).await,
            ClientMessage::DismissLauncher(d) => self.launcher(data, d, false, effects).await,
            ClientMessage::EndAllContent => {
                for slot in SessionSlot::ALL {
                    self.end_session(data, slot, EndReason::UserClosed, effects).await?;
                }
                effects.needs_refresh = true;
                Ok(())
            }
            ClientMessage::BeginBatch | ClientMessage::EndBatch => Ok(()),
        }
    }

    /// Re-push everything a reconnecting browser needs to resume.
    pub fn resume(&self, data: &SocketClientData, effects: &mut Effects) {
        for slot in SessionSlot::ALL {
            if let Some(session) = data.session(slot) {
                effects.messages.push(set_message(slot, session.clone()));
            }
        }
        for track in &data.track_conditions {
            effects
                .messages
                .push(ServerMessage::TrackClientCondition(track.clone()));
        }
        for timer in &data.wait_timers {
            effects
                .messages
                .push(ServerMessage::StartConditionWaitTimer(timer.clone()));
        }
        if let Some(user) = &data.external_user_id {
            effects.rooms_to_join.push(user_room(&self.environment.id, user));
        }
    }

    /// React to a signal from a sibling connection of the same user.
    pub fn handle_peer(
        &self,
        data: &mut SocketClientData,
        signal: PeerSignal,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        match signal {
            PeerSignal::StepChanged {
                content_id,
                step_cvid,
            } => {
                let Some((slot, mut session)) = data
                    .active_sessions()
                    .find(|s| s.content_id() == content_id)
                    .and_then(|s| s.slot().map(|slot| (slot, s.clone())))
                else {
                    return Ok(());
                };
                if session.current_step.as_ref().is_some_and(|c| c.cvid == step_cvid) {
                    return Ok(());
                }
                session.go_to_step(&step_cvid)?;
                let session_id = session.id.clone();
                data.apply(SocketClientDataPatch::session(slot, Some(session)));
                effects
                    .messages
                    .push(ServerMessage::ForceGoToStep(ForceGoToStepData {
                        session_id,
                        step_cvid,
                    }));
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    // Reads go through the transition's staged writes first.

    async fn user_attributes(&self, staged: &StagedWrites, user: &str) -> Result<Attributes, StoreError> {
        match staged.user(user) {
            Some(attributes) => Ok(attributes.clone()),
            None => self.stores.biz.user_attributes(&self.environment.id, user).await,
        }
    }

    async fn company_attributes(
        &self,
        staged: &StagedWrites,
        company: &str,
    ) -> Result<Attributes, StoreError> {
        match staged.company(company) {
            Some(attributes) => Ok(attributes.clone()),
            None => self.stores.biz.company_attributes(&self.environment.id, company).await,
        }
    }

    async fn membership_attributes(
        &self,
        staged: &StagedWrites,
        user: &str,
        company: &str,
    ) -> Result<Attributes, StoreError> {
        match staged.membership(user, company) {
            Some(attributes) => Ok(attributes.clone()),
            None => {
                self.stores
                    .biz
                    .membership_attributes(&self.environment.id, user, company)
                    .await
            }
        }
    }

    async fn attribute_definitions(
        &self,
        staged: &StagedWrites,
    ) -> Result<Vec<AttributeDefinition>, StoreError> {
        let mut definitions = self
            .stores
            .content
            .attribute_definitions(&self.environment.id)
            .await?;
        staged.overlay_definitions(&mut definitions);
        Ok(definitions)
    }

    async fn upsert_user(
        &self,
        data: &mut SocketClientData,
        d: UpsertUserData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        if d.external_user_id.is_empty() {
            return Err(CoreError::Validation("externalUserId must not be empty".into()).into());
        }
        let env = &self.environment.id;

        if let Some(previous) = data.external_user_id.clone() {
            if previous != d.external_user_id {
                tracing::info!(
                    socket_id = %data.socket_id,
                    previous = %previous,
                    next = %d.external_user_id,
                    "End user changed, closing sessions",
                );
                for slot in SessionSlot::ALL {
                    self.end_session(data, slot, EndReason::Replaced, effects).await?;
                }
                effects.rooms_to_leave.push(user_room(env, &previous));
                data.apply(SocketClientDataPatch {
                    external_company_id: Some(None),
                    client_conditions: Some(HashMap::new()),
                    fired_wait_timers: Some(HashSet::new()),
                    ..Default::default()
                });
            }
        }

        if data.external_user_id.as_deref() != Some(d.external_user_id.as_str()) {
            data.apply(SocketClientDataPatch {
                external_user_id: Some(Some(d.external_user_id.clone())),
                ..Default::default()
            });
            effects.rooms_to_join.push(user_room(env, &d.external_user_id));
        }

        let current = self.user_attributes(&effects.writes, &d.external_user_id).await?;
        if let Some(merged) = merge_attributes(&current, &d.attributes) {
            effects.writes.save_user(&d.external_user_id, merged);
            effects
                .writes
                .register_definitions(infer_definitions(&d.attributes, AttributeBizType::User));
        }
        effects.needs_refresh = true;
        Ok(())
    }

    async fn upsert_company(
        &self,
        data: &mut SocketClientData,
        d: UpsertCompanyData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let user = require_user(data)?;
        if d.external_company_id.is_empty() {
            return Err(CoreError::Validation("externalCompanyId must not be empty".into()).into());
        }
        let company = d.external_company_id.as_str();

        if data.external_company_id.as_deref() != Some(company) {
            data.apply(SocketClientDataPatch {
                external_company_id: Some(Some(company.to_string())),
                ..Default::default()
            });
        }

        let current = self.company_attributes(&effects.writes, company).await?;
        if let Some(merged) = merge_attributes(&current, &d.attributes) {
            effects.writes.save_company(company, merged);
            effects
                .writes
                .register_definitions(infer_definitions(&d.attributes, AttributeBizType::Company));
        }
        let current = self.membership_attributes(&effects.writes, &user, company).await?;
        if let Some(merged) = merge_attributes(&current, &d.membership_attributes) {
            effects.writes.save_membership(&user, company, merged);
            effects.writes.register_definitions(infer_definitions(
                &d.membership_attributes,
                AttributeBizType::Membership,
            ));
        }
        effects.needs_refresh = true;
        Ok(())
    }

    fn update_client_context(
        &self,
        data: &mut SocketClientData,
        context: ClientContext,
        effects: &mut Effects,
    ) {
        if data.client_context == context {
            return;
        }
        data.apply(SocketClientDataPatch {
            client_context: Some(context),
            ..Default::default()
        });
        effects.needs_refresh = true;
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    async fn start_content(
        &self,
        data: &mut SocketClientData,
        d: StartContentData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let user = require_user(data)?;
        let record = self
            .stores
            .content
            .find_published(&self.environment.id, &d.content_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "Content",
                id: d.content_id.clone(),
            })?;
        self.start_locked(data, &user, record, d.step_cvid.as_deref(), effects)
            .await?;
        effects.needs_refresh = true;
        Ok(())
    }

    /// Start a session under the user's start-content lock. The lock is held
    /// until the transition commits; a transition that already holds it
    /// reuses it.
    async fn start_locked(
        &self,
        data: &mut SocketClientData,
        user: &str,
        record: PublishedContentRecord,
        step_cvid: Option<&str>,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let key = start_content_lock_key(&self.environment.id, user);
        if !effects.held_locks.iter().any(|(held, _)| *held == key) {
            let token = Uuid::new_v4().to_string();
            if !self
                .stores
                .locks
                .try_acquire(&key, &token, self.lock_ttl_secs)
                .await?
            {
                return Err(CoreError::Conflict(format!(
                    "a content start is already in progress for user {user}"
                ))
                .into());
            }
            effects.held_locks.push((key, token));
        }
        self.start_session(data, user, record, step_cvid, effects).await
    }

    async fn start_session(
        &self,
        data: &mut SocketClientData,
        user: &str,
        record: PublishedContentRecord,
        step_cvid: Option<&str>,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let slot = record.content_type.slot().ok_or_else(|| {
            CoreError::Validation(format!(
                "{} content has no session slot",
                record.content_type.as_str()
            ))
        })?;

        // Starting what is already shown only moves it to the requested step.
        if let Some(mut session) = data
            .session(slot)
            .filter(|s| s.content_id() == record.content_id)
            .cloned()
        {
            match step_cvid {
                Some(cvid) => {
                    session.go_to_step(cvid)?;
                    let session_id = session.id.clone();
                    data.apply(SocketClientDataPatch::session(slot, Some(session)));
                    effects
                        .messages
                        .push(ServerMessage::ForceGoToStep(ForceGoToStepData {
                            session_id,
                            step_cvid: cvid.to_string(),
                        }));
                }
                None => effects.messages.push(set_message(slot, session)),
            }
            return Ok(());
        }

        let attributes = self.attribute_definitions(&effects.writes).await?;
        let mut session = SdkContentSession {
            id: Uuid::new_v4().to_string(),
            content_type: record.content_type,
            draft_mode: false,
            attributes,
            content: ContentSummary {
                id: record.content_id.clone(),
                name: record.name.clone(),
                content_type: record.content_type,
                project: Some(ProjectRef {
                    id: self.environment.project_id.clone(),
                }),
            },
            current_step: None,
            expand_pending: None,
            version: record.version,
        };
        match step_cvid {
            Some(cvid) => session.go_to_step(cvid)?,
            None => {
                session.current_step = session.version.steps.first().map(|step| CurrentStep {
                    id: step.id.clone(),
                    cvid: step.cvid.clone(),
                });
            }
        }

        self.end_session(data, slot, EndReason::Replaced, effects).await?;
        data.apply(SocketClientDataPatch::activate(slot, session.clone()));
        effects.writes.update_content_state(
            user,
            &record.content_id,
            ContentStatePatch {
                actived: Some(true),
                seen: Some(true),
                completed: None,
            },
        );

        tracing::info!(
            socket_id = %data.socket_id,
            session_id = %session.id,
            content_id = %record.content_id,
            content_type = record.content_type.as_str(),
            "Content session started",
        );
        effects.events.push(
            self.event(GatewayEventKind::ContentStarted, data)
                .with_session(session.id.clone(), record.content_id.clone()),
        );
        if let Some(step) = &session.current_step {
            effects.events.push(
                self.event(GatewayEventKind::StepSeen, data)
                    .with_session(session.id.clone(), record.content_id.clone())
                    .with_payload(json!({ "stepCvid": step.cvid })),
            );
        }
        effects.messages.push(set_message(slot, session));
        Ok(())
    }

    /// Clear `slot`. Returns `false` when it was already empty.
    async fn end_session(
        &self,
        data: &mut SocketClientData,
        slot: SessionSlot,
        reason: EndReason,
        effects: &mut Effects,
    ) -> SyncResult<bool> {
        let Some(session) = data.session(slot).cloned() else {
            return Ok(false);
        };
        data.apply(SocketClientDataPatch::session(slot, None));

        if reason == EndReason::Completed {
            if let Some(user) = &data.external_user_id {
                effects.writes.update_content_state(
                    user,
                    session.content_id(),
                    ContentStatePatch {
                        completed: Some(true),
                        ..Default::default()
                    },
                );
            }
        }

        tracing::info!(
            socket_id = %data.socket_id,
            session_id = %session.id,
            content_id = %session.content_id(),
            reason = reason.as_str(),
            "Content session ended",
        );
        effects.events.push(
            self.event(GatewayEventKind::ContentEnded, data)
                .with_session(session.id.clone(), session.content_id())
                .with_payload(json!({ "reason": reason.as_str() })),
        );
        effects.messages.push(unset_message(slot, session.id));
        Ok(true)
    }

    async fn end_content(
        &self,
        data: &mut SocketClientData,
        d: EndContentData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let (slot, _) = data
            .find_session(&d.session_id)
            .ok_or_else(|| session_not_found(&d.session_id))?;
        self.end_session(data, slot, d.reason, effects).await?;
        effects.needs_refresh = true;
        Ok(())
    }

    fn go_to_step(
        &self,
        data: &mut SocketClientData,
        d: GoToStepData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let (slot, mut session) = data
            .find_session(&d.session_id)
            .map(|(slot, s)| (slot, s.clone()))
            .ok_or_else(|| session_not_found(&d.session_id))?;
        session.go_to_step(&d.step_cvid)?;
        let content_id = session.content_id().to_string();
        data.apply(SocketClientDataPatch::session(slot, Some(session)));

        effects.events.push(
            self.event(GatewayEventKind::StepSeen, data)
                .with_session(d.session_id, content_id.clone())
                .with_payload(json!({ "stepCvid": d.step_cvid })),
        );
        if let Some(user) = &data.external_user_id {
            effects.peer_signals.push((
                user_room(&self.environment.id, user),
                PeerSignal::StepChanged {
                    content_id,
                    step_cvid: d.step_cvid,
                },
            ));
        }
        Ok(())
    }

    fn answer_question(
        &self,
        data: &SocketClientData,
        d: AnswerQuestionData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let content_id = data
            .find_session(&d.session_id)
            .map(|(_, s)| s.content_id().to_string())
            .ok_or_else(|| session_not_found(&d.session_id))?;
        effects.events.push(
            self.event(GatewayEventKind::QuestionAnswered, data)
                .with_session(d.session_id, content_id)
                .with_payload(json!({
                    "questionCvid": d.question_cvid,
                    "questionName": d.question_name,
                    "answer": d.answer,
                })),
        );
        Ok(())
    }

    fn checklist_session(
        data: &SocketClientData,
        session_id: &str,
    ) -> Result<SdkContentSession, CoreError> {
        match data.find_session(session_id) {
            Some((SessionSlot::Checklist, session)) => Ok(session.clone()),
            Some(_) => Err(CoreError::Validation(format!(
                "session {session_id} is not a checklist"
            ))),
            None => Err(session_not_found(session_id)),
        }
    }

    fn click_checklist_task(
        &self,
        data: &mut SocketClientData,
        d: ClickChecklistTaskData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let mut session = Self::checklist_session(data, &d.session_id)?;
        session.mark_task_clicked(&d.task_id)?;
        let content_id = session.content_id().to_string();
        data.apply(SocketClientDataPatch::session(SessionSlot::Checklist, Some(session)));

        effects.events.push(
            self.event(GatewayEventKind::ChecklistTaskClicked, data)
                .with_session(d.session_id, content_id)
                .with_payload(json!({ "taskId": d.task_id })),
        );
        effects.needs_refresh = true;
        Ok(())
    }

    fn checklist_visibility(
        &self,
        data: &SocketClientData,
        d: SessionRef,
        shown: bool,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let session = Self::checklist_session(data, &d.session_id)?;
        let kind = if shown {
            GatewayEventKind::ChecklistShown
        } else {
            GatewayEventKind::ChecklistHidden
        };
        effects
            .events
            .push(self.event(kind, data).with_session(d.session_id, session.content_id()));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Analytics-only messages
    // -----------------------------------------------------------------------

    fn track_event(&self, data: &SocketClientData, d: TrackEventData, effects: &mut Effects) {
        let mut event = self
            .event(GatewayEventKind::EventTracked, data)
            .with_event_name(d.event_name)
            .with_payload(d.data);
        if let Some(session_id) = d.session_id {
            if let Some((_, session)) = data.find_session(&session_id) {
                event = event.with_session(session_id.clone(), session.content_id());
            }
        }
        effects.events.push(event);
    }

    fn tooltip_target_missing(
        &self,
        data: &SocketClientData,
        d: TooltipTargetMissingData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let content_id = data
            .find_session(&d.session_id)
            .map(|(_, s)| s.content_id().to_string())
            .ok_or_else(|| session_not_found(&d.session_id))?;
        tracing::debug!(
            session_id = %d.session_id,
            step_cvid = %d.step_cvid,
            "Tooltip target missing",
        );
        effects.events.push(
            self.event(GatewayEventKind::TooltipTargetMissing, data)
                .with_session(d.session_id, content_id)
                .with_payload(json!({ "stepCvid": d.step_cvid })),
        );
        Ok(())
    }

    async fn launcher(
        &self,
        data: &SocketClientData,
        d: LauncherData,
        activated: bool,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let kind = if activated {
            GatewayEventKind::LauncherActivated
        } else {
            GatewayEventKind::LauncherDismissed
        };
        if activated {
            if let Some(user) = &data.external_user_id {
                effects.writes.update_content_state(
                    user,
                    &d.content_id,
                    ContentStatePatch {
                        actived: Some(true),
                        seen: Some(true),
                        completed: None,
                    },
                );
            }
        }
        effects.events.push(
            self.event(kind, data)
                .with_content(d.content_id)
                .with_payload(json!({ "versionId": d.version_id })),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Client-observed conditions
    // -----------------------------------------------------------------------

    fn toggle_client_condition(
        &self,
        data: &mut SocketClientData,
        d: ToggleClientConditionData,
        effects: &mut Effects,
    ) {
        if !data.is_tracking(&d.condition_id) {
            tracing::debug!(condition_id = %d.condition_id, "Ignoring toggle for untracked condition");
            return;
        }
        if data.client_conditions.get(&d.condition_id) == Some(&d.is_active) {
            return;
        }
        let mut conditions = data.client_conditions.clone();
        conditions.insert(d.condition_id, d.is_active);
        data.apply(SocketClientDataPatch {
            client_conditions: Some(conditions),
            ..Default::default()
        });
        effects.needs_refresh = true;
    }

    fn fire_wait_timer(
        &self,
        data: &mut SocketClientData,
        d: FireWaitTimerData,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let Some(timer) = data
            .wait_timers
            .iter()
            .find(|t| t.condition_id == d.condition_id && t.version_id == d.version_id)
            .cloned()
        else {
            tracing::debug!(condition_id = %d.condition_id, "Ignoring fire for unknown wait timer");
            return Ok(());
        };
        let now = Utc::now();
        let due = timer
            .fire_at()
            .and_then(|at| at.checked_sub_signed(chrono::TimeDelta::seconds(WAIT_TIMER_GRACE_SECS)))
            .is_some_and(|earliest| earliest <= now);
        if !due {
            return Err(CoreError::Validation(format!(
                "wait timer {} fired before it was due",
                d.condition_id
            ))
            .into());
        }

        let timers = data
            .wait_timers
            .iter()
            .filter(|t| t.condition_id != d.condition_id)
            .cloned()
            .collect();
        let mut fired = data.fired_wait_timers.clone();
        fired.insert(d.condition_id);
        data.apply(SocketClientDataPatch {
            wait_timers: Some(timers),
            fired_wait_timers: Some(fired),
            ..Default::default()
        });
        effects.needs_refresh = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Gather every fact the evaluator may consult for this client,
    /// including writes staged but not yet committed.
    pub async fn build_context(
        &self,
        data: &SocketClientData,
        staged: &StagedWrites,
    ) -> Result<EvaluationContext, StoreError> {
        let env = &self.environment.id;
        let biz = &self.stores.biz;

        let mut ctx = EvaluationContext::new(Utc::now());
        ctx.current_url = data.client_context.page_url.clone();
        ctx.client_conditions = data.client_conditions.clone();
        ctx.fired_wait_timers = data.fired_wait_timers.clone();
        ctx.attribute_definitions = self.attribute_definitions(staged).await?;

        if let Some(user) = data.external_user_id.as_deref() {
            ctx.user_attributes = self.user_attributes(staged, user).await?;
            ctx.segments = biz.segments(env, user).await?;
            ctx.contents = biz.content_states(env, user).await?;
            staged.overlay_content_states(user, &mut ctx.contents);
            ctx.events = biz.events(env, user, None).await?;

            if let Some(company) = data.external_company_id.as_deref() {
                ctx.company_attributes = self.company_attributes(staged, company).await?;
                ctx.membership_attributes = self.membership_attributes(staged, user, company).await?;
            }
        }
        Ok(ctx)
    }

    /// Re-evaluate targeting for the current state of `data`.
    pub async fn refresh(&self, data: &mut SocketClientData, effects: &mut Effects) -> SyncResult<()> {
        let Some(user) = data.external_user_id.clone() else {
            return Ok(());
        };
        let mut ctx = self.build_context(data, &effects.writes).await?;
        let published = self
            .stores
            .content
            .list_published(&self.environment.id)
            .await?;

        for slot in SessionSlot::ALL {
            let hide_rules = data
                .session(slot)
                .map(|s| s.hide_rules().to_vec())
                .unwrap_or_default();
            if !hide_rules.is_empty() && rules_hold(&hide_rules, &ctx) {
                self.end_session(data, slot, EndReason::HideRules, effects).await?;
            }
        }

        for slot in SessionSlot::ALL {
            if data.session(slot).is_some() {
                continue;
            }
            let candidate = published.iter().find(|record| {
                is_auto_start_candidate(record, slot, &ctx)
                    && rules_hold(&record.version.config.auto_start_rules, &ctx)
            });
            let Some(record) = candidate.cloned() else {
                continue;
            };
            let content_id = record.content_id.clone();
            match self.start_locked(data, &user, record, None, effects).await {
                Ok(()) => {
                    let state = ctx.contents.entry(content_id).or_default();
                    state.actived = true;
                    state.seen = true;
                }
                Err(SyncError::Rejected(e)) => {
                    tracing::debug!(content_id = %content_id, error = %e, "Auto-start skipped");
                }
                Err(e) => return Err(e),
            }
        }

        self.complete_checklist_tasks(data, &mut ctx, effects).await?;
        self.reconcile_tracking(data, &published, &ctx, effects);
        Ok(())
    }

    async fn complete_checklist_tasks(
        &self,
        data: &mut SocketClientData,
        ctx: &mut EvaluationContext,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let Some(mut session) = data.checklist_session.clone() else {
            return Ok(());
        };

        let mut completed = Vec::new();
        for item in session.checklist_items() {
            if item.is_completed || (item.complete_conditions.is_empty() && !item.is_clicked) {
                continue;
            }
            ctx.task_clicked = item.is_clicked;
            if rules_hold(&item.complete_conditions, ctx) {
                completed.push(item.id.clone());
            }
        }
        ctx.task_clicked = false;
        if completed.is_empty() {
            return Ok(());
        }

        for task_id in completed {
            if session.mark_task_completed(&task_id)? {
                effects.events.push(
                    self.event(GatewayEventKind::ChecklistTaskCompleted, data)
                        .with_session(session.id.clone(), session.content_id())
                        .with_payload(json!({ "taskId": task_id })),
                );
                effects
                    .messages
                    .push(ServerMessage::ChecklistTaskCompleted(ChecklistTaskCompletedData {
                        session_id: session.id.clone(),
                        task_id,
                    }));
            }
        }

        let all_done = session
            .version
            .checklist
            .as_ref()
            .is_some_and(|c| c.all_completed());
        let content_id = session.content_id().to_string();
        data.apply(SocketClientDataPatch::session(SessionSlot::Checklist, Some(session)));

        if all_done {
            if let Some(user) = &data.external_user_id {
                effects.writes.update_content_state(
                    user,
                    &content_id,
                    ContentStatePatch {
                        completed: Some(true),
                        ..Default::default()
                    },
                );
            }
        }
        Ok(())
    }

    /// Bring tracked conditions and wait timers in line with [`plan_tracking`].
    fn reconcile_tracking(
        &self,
        data: &mut SocketClientData,
        published: &[PublishedContentRecord],
        ctx: &EvaluationContext,
        effects: &mut Effects,
    ) {
        let plan = plan_tracking(data, published, ctx);

        let wanted: HashSet<String> = plan.tracks.iter().map(|t| t.condition.id.clone()).collect();
        for stale in data.track_conditions.iter().filter(|t| !wanted.contains(t.condition_id())) {
            effects
                .messages
                .push(ServerMessage::UntrackClientCondition(ConditionRef {
                    condition_id: stale.condition.id.clone(),
                }));
        }
        let mut tracks = Vec::with_capacity(plan.tracks.len());
        for track in plan.tracks {
            match data.track_conditions.iter().find(|t| t.condition.id == track.condition.id) {
                Some(existing) => tracks.push(existing.clone()),
                None => {
                    effects
                        .messages
                        .push(ServerMessage::TrackClientCondition(track.clone()));
                    tracks.push(track);
                }
            }
        }

        let wanted: HashSet<String> = plan.timers.iter().map(|t| t.condition_id.clone()).collect();
        for stale in data.wait_timers.iter().filter(|t| !wanted.contains(&t.condition_id)) {
            effects
                .messages
                .push(ServerMessage::CancelConditionWaitTimer(ConditionRef {
                    condition_id: stale.condition_id.clone(),
                }));
        }
        let mut timers = Vec::with_capacity(plan.timers.len());
        for timer in plan.timers {
            match data.wait_timers.iter().find(|t| t.condition_id == timer.condition_id) {
                Some(existing) => timers.push(existing.clone()),
                None => {
                    effects
                        .messages
                        .push(ServerMessage::StartConditionWaitTimer(timer.clone()));
                    timers.push(timer);
                }
            }
        }

        let client_conditions: HashMap<ConditionId, bool> = data
            .client_conditions
            .iter()
            .filter(|(id, _)| tracks.iter().any(|t| &t.condition.id == *id))
            .map(|(id, active)| (id.clone(), *active))
            .collect();
        let fired: HashSet<ConditionId> = data
            .fired_wait_timers
            .iter()
            .filter(|id| plan.wait_ids.contains(*id))
            .cloned()
            .collect();

        let unchanged = tracks == data.track_conditions
            && timers == data.wait_timers
            && client_conditions == data.client_conditions
            && fired == data.fired_wait_timers;
        if !unchanged {
            data.apply(SocketClientDataPatch {
                track_conditions: Some(tracks),
                wait_timers: Some(timers),
                client_conditions: Some(client_conditions),
                fired_wait_timers: Some(fired),
                ..Default::default()
            });
        }
    }
}

struct Source<'a> {
    content_id: &'a str,
    content_type: ContentType,
    version_id: &'a str,
    conditions: &'a [RulesCondition],
}

/// Work out which leaves the browser must observe and which wait timers
/// must run, given the sessions in `data` and the auto-start candidates for
/// its empty slots.
///
/// Element, text-input and text-fill leaves are always observed by the
/// browser; current-page leaves only while no page URL is known.
pub fn plan_tracking(
    data: &SocketClientData,
    published: &[PublishedContentRecord],
    ctx: &EvaluationContext,
) -> TrackingPlan {
    let mut sources = Vec::new();
    for session in data.active_sessions() {
        sources.push(Source {
            content_id: session.content_id(),
            content_type: session.content_type,
            version_id: session.version_id(),
            conditions: session.hide_rules(),
        });
        for item in session.checklist_items().iter().filter(|i| !i.is_completed) {
            sources.push(Source {
                content_id: session.content_id(),
                content_type: session.content_type,
                version_id: session.version_id(),
                conditions: &item.complete_conditions,
            });
        }
    }
    for slot in SessionSlot::ALL {
        if data.session(slot).is_some() {
            continue;
        }
        for record in published.iter().filter(|r| is_auto_start_candidate(r, slot, ctx)) {
            sources.push(Source {
                content_id: &record.content_id,
                content_type: record.content_type,
                version_id: &record.version.id,
                conditions: &record.version.config.auto_start_rules,
            });
        }
    }

    let page_known = data.client_context.page_url.is_some();
    let mut plan = TrackingPlan::default();
    for source in sources {
        for leaf in flatten_leaves(source.conditions) {
            collect_leaf(&mut plan, &source, leaf, page_known, &data.fired_wait_timers, ctx.now);
        }
    }
    plan
}

fn collect_leaf(
    plan: &mut TrackingPlan,
    source: &Source<'_>,
    leaf: &RulesCondition,
    page_known: bool,
    fired: &HashSet<ConditionId>,
    now: Timestamp,
) {
    if let ConditionKind::Wait(wait) = &leaf.kind {
        plan.wait_ids.insert(leaf.id.clone());
        if !fired.contains(&leaf.id) && !plan.timers.iter().any(|t| t.condition_id == leaf.id) {
            plan.timers.push(WaitTimerCondition {
                content_id: source.content_id.to_string(),
                version_id: source.version_id.to_string(),
                condition_id: leaf.id.clone(),
                wait_seconds: wait.second,
                started_at: now,
            });
        }
        return;
    }

    let condition_type = leaf.condition_type();
    let client_side = condition_type.is_client_only()
        || (condition_type == ConditionType::CurrentPage && !page_known);
    if client_side && !plan.tracks.iter().any(|t| t.condition.id == leaf.id) {
        plan.tracks.push(TrackCondition {
            content_id: source.content_id.to_string(),
            content_type: source.content_type,
            version_id: source.version_id.to_string(),
            condition: leaf.clone(),
        });
    }
}
