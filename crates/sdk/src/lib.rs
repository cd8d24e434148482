//! Waypoint embedded client core.
//!
//! [`Waypoint`] is the handle host applications hold. After
//! [`Waypoint::init`] it keeps a connection to the gateway, mirrors the
//! sessions the gateway pushes into a [`ClientState`] snapshot, and evaluates
//! the DOM-backed conditions the gateway asks it to track.

pub mod attributes;
pub mod config;
pub mod connection;
pub mod element;
pub mod error;
pub mod reconnect;
pub mod state;
pub mod synchronizer;
pub mod timers;

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use waypoint_core::attributes::Attributes;
use waypoint_core::protocol::{ClientMessage, EndReason};
use waypoint_events::evented::Subscription;

pub use config::SdkConfig;
pub use error::{SdkError, SdkResult};
pub use state::ClientState;

use connection::{lock, SharedSynchronizer};
use element::Document;
use synchronizer::ClientSynchronizer;

struct Running {
    sync: SharedSynchronizer,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The SDK entry point.
#[derive(Default)]
pub struct Waypoint {
    running: Option<Running>,
}

impl Waypoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the gateway connection. Must be called from within a tokio
    /// runtime.
    pub fn init(&mut self, config: SdkConfig) -> SdkResult<()> {
        if self.running.is_some() {
            return Err(SdkError::AlreadyInitialized);
        }
        config.validate()?;

        let (sync, channels) = ClientSynchronizer::new();
        let sync = Arc::new(Mutex::new(sync));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(connection::run(
            config,
            Arc::clone(&sync),
            channels,
            cancel.clone(),
        ));
        self.running = Some(Running { sync, cancel, task });
        tracing::info!("Waypoint SDK initialised");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    fn with_sync<R>(&self, f: impl FnOnce(&mut ClientSynchronizer) -> SdkResult<R>) -> SdkResult<R> {
        let running = self.running.as_ref().ok_or(SdkError::NotInitialized)?;
        let mut sync = lock(&running.sync);
        f(&mut sync)
    }

    pub fn identify(&self, external_user_id: &str, attributes: &Attributes) -> SdkResult<bool> {
        self.with_sync(|s| s.identify(external_user_id, attributes))
    }

    pub fn group(
        &self,
        external_company_id: &str,
        attributes: &Attributes,
        membership: &Attributes,
    ) -> SdkResult<bool> {
        self.with_sync(|s| s.group(external_company_id, attributes, membership))
    }

    pub fn set_page_url(&self, url: &str) -> SdkResult<bool> {
        self.with_sync(|s| s.set_page_url(url))
    }

    pub fn track(&self, event_name: &str, data: Value) -> SdkResult<()> {
        self.with_sync(|s| s.track(event_name, data))
    }

    pub fn start(&self, content_id: &str) -> SdkResult<()> {
        self.with_sync(|s| s.start_content(content_id, None))
    }

    pub fn end(&self, session_id: &str) -> SdkResult<()> {
        self.with_sync(|s| s.end_content(session_id, EndReason::UserClosed))
    }

    pub fn end_all(&self) -> SdkResult<()> {
        self.with_sync(|s| s.send(ClientMessage::EndAllContent))
    }

    pub fn go_to_step(&self, session_id: &str, step_cvid: &str) -> SdkResult<()> {
        self.with_sync(|s| s.go_to_step(session_id, step_cvid))
    }

    pub fn click_checklist_task(&self, session_id: &str, task_id: &str) -> SdkResult<()> {
        self.with_sync(|s| s.click_checklist_task(session_id, task_id))
    }

    /// Send any other protocol message as-is.
    pub fn send(&self, message: ClientMessage) -> SdkResult<()> {
        self.with_sync(|s| s.send(message))
    }

    /// Forget the current user and end their content.
    pub fn reset(&self) -> SdkResult<()> {
        self.with_sync(|s| s.reset())
    }

    /// Re-evaluate tracked conditions and the current tooltip target against
    /// the current DOM. Hosts call this from their mutation observer.
    pub fn observe<D: Document>(&self, doc: &D) -> SdkResult<usize> {
        self.with_sync(|s| s.observe(doc))
    }

    pub fn snapshot(&self) -> SdkResult<ClientState> {
        self.with_sync(|s| Ok(s.snapshot()))
    }

    /// Listen for state changes.
    pub fn subscribe<F>(&self, listener: F) -> SdkResult<Subscription>
    where
        F: Fn(&ClientState) + Send + Sync + 'static,
    {
        self.with_sync(|s| Ok(s.store().subscribe(listener)))
    }

    /// Close the connection and wait for the loop to stop.
    pub async fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            if let Err(e) = running.task.await {
                tracing::error!(error = %e, "SDK connection task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn calls_before_init_fail() {
        let sdk = Waypoint::new();
        assert!(!sdk.is_initialized());
        let err = sdk.identify("u1", &Attributes::new()).unwrap_err();
        assert_matches!(err, SdkError::NotInitialized);
        assert_eq!(err.to_string(), "You must call waypoint.init() first");
        assert_matches!(sdk.snapshot(), Err(SdkError::NotInitialized));
    }

    #[tokio::test]
    async fn init_twice_fails() {
        let mut sdk = Waypoint::new();
        // Nothing listens on this port; the loop just keeps retrying.
        let config = SdkConfig::new("ws://127.0.0.1:9", "tok").expect("config");
        sdk.init(config.clone()).expect("first init");
        assert_matches!(sdk.init(config), Err(SdkError::AlreadyInitialized));

        sdk.shutdown().await;
        assert!(!sdk.is_initialized());
    }
}
