//! Client-side view of the gateway state.
//!
//! [`ClientState`] is what the renderer reads. It only changes by applying
//! server messages in arrival order, plus the local reset on disconnect.

use waypoint_core::client_data::{TrackCondition, WaitTimerCondition};
use waypoint_core::protocol::ServerMessage;
use waypoint_core::session::{SdkContentSession, SessionSlot};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientState {
    pub connected: bool,
    pub flow_session: Option<SdkContentSession>,
    pub checklist_session: Option<SdkContentSession>,
    /// Conditions the gateway asked this client to evaluate.
    pub track_conditions: Vec<TrackCondition>,
    /// Server-started wait timers not yet fired or cancelled.
    pub wait_timers: Vec<WaitTimerCondition>,
}

impl ClientState {
    pub fn session(&self, slot: SessionSlot) -> Option<&SdkContentSession> {
        match slot {
            SessionSlot::Flow => self.flow_session.as_ref(),
            SessionSlot::Checklist => self.checklist_session.as_ref(),
        }
    }

    fn session_by_id_mut(&mut self, session_id: &str) -> Option<&mut SdkContentSession> {
        [self.flow_session.as_mut(), self.checklist_session.as_mut()]
            .into_iter()
            .flatten()
            .find(|s| s.id == session_id)
    }

    pub fn wait_timer(&self, condition_id: &str) -> Option<&WaitTimerCondition> {
        self.wait_timers.iter().find(|t| t.condition_id == condition_id)
    }

    /// Apply one server message.
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::SetFlowSession(session) => self.flow_session = Some(session.clone()),
            ServerMessage::SetChecklistSession(session) => {
                self.checklist_session = Some(session.clone())
            }
            ServerMessage::UnsetFlowSession(r) => {
                if self.flow_session.as_ref().is_some_and(|s| s.id == r.session_id) {
                    self.flow_session = None;
                }
            }
            ServerMessage::UnsetChecklistSession(r) => {
                if self.checklist_session.as_ref().is_some_and(|s| s.id == r.session_id) {
                    self.checklist_session = None;
                }
            }
            ServerMessage::ForceGoToStep(d) => match self.session_by_id_mut(&d.session_id) {
                Some(session) => {
                    if let Err(e) = session.go_to_step(&d.step_cvid) {
                        tracing::warn!(session_id = %d.session_id, error = %e, "Ignoring ForceGoToStep");
                    }
                }
                None => tracing::debug!(session_id = %d.session_id, "ForceGoToStep for an unknown session"),
            },
            ServerMessage::TrackClientCondition(track) => {
                self.track_conditions
                    .retain(|t| t.condition_id() != track.condition_id());
                self.track_conditions.push(track.clone());
            }
            ServerMessage::UntrackClientCondition(r) => {
                self.track_conditions
                    .retain(|t| t.condition_id() != r.condition_id);
            }
            ServerMessage::StartConditionWaitTimer(timer) => {
                self.wait_timers.retain(|t| t.condition_id != timer.condition_id);
                self.wait_timers.push(timer.clone());
            }
            ServerMessage::CancelConditionWaitTimer(r) => {
                self.wait_timers.retain(|t| t.condition_id != r.condition_id);
            }
            ServerMessage::ChecklistTaskCompleted(d) => {
                let Some(checklist) = self
                    .checklist_session
                    .as_mut()
                    .filter(|s| s.id == d.session_id)
                else {
                    tracing::debug!(session_id = %d.session_id, "Task completion for an unknown checklist");
                    return;
                };
                if let Err(e) = checklist.mark_task_completed(&d.task_id) {
                    tracing::warn!(session_id = %d.session_id, error = %e, "Ignoring task completion");
                }
            }
        }
    }

    /// Move a local session to another step ahead of the server echo.
    pub fn go_to_step(&mut self, session_id: &str, step_cvid: &str) -> bool {
        self.session_by_id_mut(session_id)
            .is_some_and(|s| s.go_to_step(step_cvid).is_ok())
    }

    /// Forget everything the gateway pushed. The next connection rebuilds it.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_core::protocol::{ChecklistTaskCompletedData, ForceGoToStepData, SessionRef};

    fn session(id: &str, content_type: &str) -> SdkContentSession {
        serde_json::from_value(json!({
            "id": id,
            "type": content_type,
            "content": {"id": format!("content-{id}"), "type": content_type},
            "version": {
                "id": format!("version-{id}"),
                "steps": [{"id": "st1", "cvid": "a"}, {"id": "st2", "cvid": "b"}],
                "checklist": {"items": [{"id": "t1"}]}
            }
        }))
        .expect("valid session")
    }

    #[test]
    fn slots_are_independent() {
        let mut state = ClientState::default();
        state.apply(&ServerMessage::SetFlowSession(session("f1", "flow")));
        state.apply(&ServerMessage::SetChecklistSession(session("c1", "checklist")));
        state.apply(&ServerMessage::SetFlowSession(session("f2", "flow")));

        assert_eq!(state.session(SessionSlot::Flow).map(|s| s.id.as_str()), Some("f2"));
        assert_eq!(state.session(SessionSlot::Checklist).map(|s| s.id.as_str()), Some("c1"));
    }

    #[test]
    fn unset_ignores_a_stale_session_id() {
        let mut state = ClientState::default();
        state.apply(&ServerMessage::SetFlowSession(session("f2", "flow")));
        state.apply(&ServerMessage::UnsetFlowSession(SessionRef { session_id: "f1".into() }));
        assert!(state.flow_session.is_some());

        state.apply(&ServerMessage::UnsetFlowSession(SessionRef { session_id: "f2".into() }));
        assert!(state.flow_session.is_none());
    }

    #[test]
    fn force_go_to_step_and_task_completion() {
        let mut state = ClientState::default();
        state.apply(&ServerMessage::SetFlowSession(session("f1", "flow")));
        state.apply(&ServerMessage::SetChecklistSession(session("c1", "checklist")));

        state.apply(&ServerMessage::ForceGoToStep(ForceGoToStepData {
            session_id: "f1".into(),
            step_cvid: "b".into(),
        }));
        let flow = state.flow_session.as_ref().expect("flow");
        assert_eq!(flow.current_step().map(|s| s.id.as_str()), Some("st2"));

        // Unknown step is logged and ignored.
        state.apply(&ServerMessage::ForceGoToStep(ForceGoToStepData {
            session_id: "f1".into(),
            step_cvid: "zzz".into(),
        }));
        assert_eq!(state.flow_session.as_ref().map(|s| s.current_step_index()), Some(1));

        state.apply(&ServerMessage::ChecklistTaskCompleted(ChecklistTaskCompletedData {
            session_id: "c1".into(),
            task_id: "t1".into(),
        }));
        let checklist = state.checklist_session.as_ref().expect("checklist");
        assert!(checklist.checklist_items()[0].is_completed);
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = ClientState {
            connected: true,
            ..Default::default()
        };
        state.apply(&ServerMessage::SetFlowSession(session("f1", "flow")));
        state.reset();
        assert_eq!(state, ClientState::default());
    }
}
