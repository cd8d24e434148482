//! Client half of the session protocol.
//!
//! [`ClientSynchronizer`] owns everything the SDK knows locally: identity
//! snapshots, the page context, the rendered [`ClientState`], and the wait
//! timers the gateway started. Host calls and DOM observations become
//! [`ClientMessage`]s on the outbound channel; server messages are folded
//! into the state. The connection loop moves frames between the channels
//! and the socket.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use waypoint_core::attributes::Attributes;
use waypoint_core::conditions::ids::flatten_leaves;
use waypoint_core::conditions::{
    aggregate_activation, evaluate_rules_conditions, ConditionKind, EvaluationContext,
    EvaluationOptions, RulesCondition,
};
use waypoint_core::protocol::{
    AnswerQuestionData, ClickChecklistTaskData, ClientContext, ClientMessage, EndContentData,
    EndReason, FireWaitTimerData, GoToStepData, ServerMessage, StartContentData,
    ToggleClientConditionData, TooltipTargetMissingData, TrackEventData,
};
use waypoint_core::types::{ConditionId, SessionId};
use waypoint_events::store::ExternalStore;

use crate::attributes::AttributeStore;
use crate::element::watcher::MAX_WATCH_TIMEOUT;
use crate::element::{observe_element, Document, ElementEvent, ElementWatcher};
use crate::error::{SdkError, SdkResult};
use crate::state::ClientState;
use crate::timers::WaitTimerManager;

/// Receiving ends drained by the connection loop.
pub struct SyncChannels {
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
    /// Condition ids of wait timers that fired.
    pub fired_timers: mpsc::UnboundedReceiver<String>,
}

/// Watch on the target of the flow step currently shown as a tooltip.
struct TooltipWatch {
    session_id: SessionId,
    step_cvid: String,
    /// An [`ElementWatcher`] over the node type of the observed document.
    watcher: Box<dyn Any + Send + Sync>,
}

pub struct ClientSynchronizer {
    state: Arc<ExternalStore<ClientState>>,
    attributes: AttributeStore,
    context: ClientContext,
    timers: WaitTimerManager,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    /// Last verdict sent per tracked condition.
    reported: HashMap<ConditionId, bool>,
    tooltip: Option<TooltipWatch>,
}

impl ClientSynchronizer {
    pub fn new() -> (Self, SyncChannels) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (timers, fired_timers) = WaitTimerManager::new();
        let sync = Self {
            state: Arc::new(ExternalStore::default()),
            attributes: AttributeStore::new(),
            context: ClientContext::default(),
            timers,
            outbound,
            reported: HashMap::new(),
            tooltip: None,
        };
        let channels = SyncChannels {
            outbound: outbound_rx,
            fired_timers,
        };
        (sync, channels)
    }

    /// The store UI layers subscribe to.
    pub fn store(&self) -> Arc<ExternalStore<ClientState>> {
        Arc::clone(&self.state)
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.get_snapshot()
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn timers(&self) -> &WaitTimerManager {
        &self.timers
    }

    /// Queue a message for the gateway. Messages queued while offline are
    /// sent after the next connect handshake.
    pub fn send(&self, message: ClientMessage) -> SdkResult<()> {
        tracing::trace!(kind = message.kind(), "Queueing client message");
        self.outbound.send(message).map_err(|_| SdkError::Closed)
    }

    fn require_user(&self) -> SdkResult<()> {
        match self.attributes.user_id() {
            Some(_) => Ok(()),
            None => Err(SdkError::NotIdentified),
        }
    }

    // -- Identity and context ------------------------------------------------

    /// Identify the end user. Returns `true` when an upsert was sent.
    pub fn identify(&mut self, external_user_id: &str, attributes: &Attributes) -> SdkResult<bool> {
        if external_user_id.is_empty() {
            return Err(SdkError::Config("user id must not be empty".into()));
        }
        if !self.attributes.set_user(external_user_id, attributes) {
            return Ok(false);
        }
        if let Some(upsert) = self.attributes.user_upsert() {
            self.send(ClientMessage::UpsertUser(upsert))?;
        }
        Ok(true)
    }

    /// Attach the identified user to a company.
    pub fn group(
        &mut self,
        external_company_id: &str,
        attributes: &Attributes,
        membership: &Attributes,
    ) -> SdkResult<bool> {
        self.require_user()?;
        if external_company_id.is_empty() {
            return Err(SdkError::Config("company id must not be empty".into()));
        }
        if !self
            .attributes
            .set_company(external_company_id, attributes, membership)
        {
            return Ok(false);
        }
        if let Some(upsert) = self.attributes.company_upsert() {
            self.send(ClientMessage::UpsertCompany(upsert))?;
        }
        Ok(true)
    }

    pub fn update_context(&mut self, context: ClientContext) -> SdkResult<bool> {
        if context == self.context {
            return Ok(false);
        }
        self.context = context.clone();
        self.send(ClientMessage::UpdateClientContext(context))?;
        Ok(true)
    }

    pub fn set_page_url(&mut self, url: impl Into<String>) -> SdkResult<bool> {
        let context = ClientContext {
            page_url: Some(url.into()),
            ..self.context.clone()
        };
        self.update_context(context)
    }

    /// Forget the identified user, e.g. on logout.
    pub fn reset(&mut self) -> SdkResult<()> {
        self.attributes.reset();
        self.send(ClientMessage::EndAllContent)
    }

    // -- Content actions -----------------------------------------------------

    pub fn track(&self, event_name: &str, data: Value) -> SdkResult<()> {
        self.require_user()?;
        self.send(ClientMessage::TrackEvent(TrackEventData {
            event_name: event_name.to_string(),
            session_id: None,
            data,
        }))
    }

    pub fn start_content(&self, content_id: &str, step_cvid: Option<String>) -> SdkResult<()> {
        self.require_user()?;
        self.send(ClientMessage::StartContent(StartContentData {
            content_id: content_id.to_string(),
            step_cvid,
        }))
    }

    pub fn end_content(&self, session_id: &str, reason: EndReason) -> SdkResult<()> {
        self.send(ClientMessage::EndContent(EndContentData {
            session_id: session_id.to_string(),
            reason,
        }))
    }

    /// Move a session to another step. The local state moves at once; the
    /// gateway records it and tells sibling tabs.
    pub fn go_to_step(&self, session_id: &str, step_cvid: &str) -> SdkResult<()> {
        self.state.update(|current| {
            let mut next = current.clone();
            next.go_to_step(session_id, step_cvid);
            next
        });
        self.send(ClientMessage::GoToStep(GoToStepData {
            session_id: session_id.to_string(),
            step_cvid: step_cvid.to_string(),
        }))
    }

    pub fn answer_question(&self, answer: AnswerQuestionData) -> SdkResult<()> {
        self.send(ClientMessage::AnswerQuestion(answer))
    }

    pub fn click_checklist_task(&self, session_id: &str, task_id: &str) -> SdkResult<()> {
        self.send(ClientMessage::ClickChecklistTask(ClickChecklistTaskData {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
        }))
    }

    pub fn report_tooltip_target_missing(&self, session_id: &str, step_cvid: &str) -> SdkResult<()> {
        tracing::info!(session_id, step_cvid, "Tooltip target not found");
        self.send(ClientMessage::ReportTooltipTargetMissing(TooltipTargetMissingData {
            session_id: session_id.to_string(),
            step_cvid: step_cvid.to_string(),
        }))
    }

    // -- Connection lifecycle -----------------------------------------------

    /// Messages that restore this client's identity and context on a fresh
    /// socket, as one batch.
    pub fn handshake(&self) -> Vec<ClientMessage> {
        let mut messages = vec![ClientMessage::BeginBatch];
        if let Some(user) = self.attributes.user_upsert() {
            messages.push(ClientMessage::UpsertUser(user));
        }
        if let Some(company) = self.attributes.company_upsert() {
            messages.push(ClientMessage::UpsertCompany(company));
        }
        messages.push(ClientMessage::UpdateClientContext(self.context.clone()));
        messages.push(ClientMessage::EndBatch);
        messages
    }

    pub fn on_connected(&self) {
        self.state.update(|current| ClientState {
            connected: true,
            ..current.clone()
        });
    }

    /// Drop every slot, tracked condition and pending timer. The gateway
    /// re-pushes what is still valid after the next handshake.
    pub fn on_disconnected(&mut self) {
        self.timers.cancel_all();
        self.reported.clear();
        self.tooltip = None;
        self.state.set(ClientState::default());
    }

    pub fn handle_server_message(&mut self, message: ServerMessage) {
        tracing::debug!(kind = message.kind(), "Server message");
        match &message {
            ServerMessage::StartConditionWaitTimer(timer) => {
                match timer.remaining(Utc::now()) {
                    Some(delay) => self.timers.start(&timer.condition_id, delay),
                    None => tracing::warn!(
                        condition_id = %timer.condition_id,
                        wait_seconds = timer.wait_seconds,
                        "Wait timer never fires, not scheduling it"
                    ),
                }
            }
            ServerMessage::CancelConditionWaitTimer(r) => {
                self.timers.cancel(&r.condition_id);
            }
            ServerMessage::TrackClientCondition(track) => {
                self.reported.remove(track.condition_id());
            }
            ServerMessage::UntrackClientCondition(r) => {
                self.reported.remove(&r.condition_id);
            }
            _ => {}
        }
        self.state.update(|current| {
            let mut next = current.clone();
            next.apply(&message);
            next
        });
    }

    /// Report a fired wait timer. Returns `false` for a timer the gateway
    /// no longer tracks.
    pub fn on_timer_fired(&mut self, condition_id: &str) -> SdkResult<bool> {
        let Some(timer) = self.state.get_snapshot().wait_timer(condition_id).cloned() else {
            tracing::debug!(condition_id, "Ignoring fire of an untracked wait timer");
            return Ok(false);
        };
        self.state.update(|current| {
            let mut next = current.clone();
            next.wait_timers.retain(|t| t.condition_id != condition_id);
            next
        });
        self.send(ClientMessage::FireConditionWaitTimer(FireWaitTimerData {
            version_id: timer.version_id,
            condition_id: timer.condition_id,
        }))?;
        Ok(true)
    }

    /// Evaluate every tracked condition against `doc` and report verdicts
    /// that changed, then check the current tooltip target. Returns the
    /// number of messages sent.
    pub fn observe<D: Document>(&mut self, doc: &D) -> SdkResult<usize> {
        let tracked = self.state.get_snapshot().track_conditions;
        let mut sent = 0;
        for track in &tracked {
            let Some(is_active) = client_verdict(doc, &track.condition, self.context.page_url.as_deref())
            else {
                continue;
            };
            if self.reported.get(track.condition_id()) == Some(&is_active) {
                continue;
            }
            self.send(ClientMessage::ToggleClientCondition(ToggleClientConditionData {
                condition_id: track.condition_id().to_string(),
                is_active,
            }))?;
            self.reported
                .insert(track.condition_id().to_string(), is_active);
            sent += 1;
        }
        if self.watch_tooltip_target(doc)? {
            sent += 1;
        }
        Ok(sent)
    }

    /// Report the current flow step's target as missing once it has not
    /// shown up within [`MAX_WATCH_TIMEOUT`] of the step becoming current.
    fn watch_tooltip_target<D: Document>(&mut self, doc: &D) -> SdkResult<bool> {
        let snapshot = self.state.get_snapshot();
        let current = snapshot.flow_session.as_ref().and_then(|session| {
            let step = session.current_step()?;
            step.target.as_ref().map(|target| (session, step, target))
        });
        let Some((session, step, target)) = current else {
            self.tooltip = None;
            return Ok(false);
        };

        let watching = self.tooltip.as_ref().is_some_and(|w| {
            w.session_id == session.id
                && w.step_cvid == step.cvid
                && w.watcher.is::<ElementWatcher<D::Node>>()
        });
        if !watching {
            self.tooltip = Some(TooltipWatch {
                session_id: session.id.clone(),
                step_cvid: step.cvid.clone(),
                watcher: Box::new(ElementWatcher::<D::Node>::new(
                    target.clone(),
                    MAX_WATCH_TIMEOUT,
                )?),
            });
        }

        let Some(watch) = self.tooltip.as_mut() else {
            return Ok(false);
        };
        let Some(watcher) = watch.watcher.downcast_mut::<ElementWatcher<D::Node>>() else {
            return Ok(false);
        };
        if !matches!(watcher.check(doc), Some(ElementEvent::Timeout)) {
            return Ok(false);
        }
        let session_id = watch.session_id.clone();
        let step_cvid = watch.step_cvid.clone();
        self.report_tooltip_target_missing(&session_id, &step_cvid)?;
        Ok(true)
    }
}

/// Decide a tracked condition from what the browser can see. `None` while
/// it is still pending.
pub fn client_verdict<D: Document>(
    doc: &D,
    condition: &RulesCondition,
    page_url: Option<&str>,
) -> Option<bool> {
    let mut ctx = EvaluationContext::new(Utc::now());
    ctx.current_url = page_url.map(str::to_string);
    for leaf in flatten_leaves(std::slice::from_ref(condition)) {
        let selector = match &leaf.kind {
            ConditionKind::Element(d) => &d.element_data,
            ConditionKind::TextInput(d) => &d.element_data,
            ConditionKind::TextFill(d) => &d.element_data,
            _ => continue,
        };
        ctx.elements
            .insert(leaf.id.clone(), observe_element(doc, selector));
    }
    let evaluated = evaluate_rules_conditions(
        std::slice::from_ref(condition),
        &ctx,
        &EvaluationOptions::default(),
    );
    aggregate_activation(&evaluated).decided()
}
