//! Watches one selector descriptor until its element shows up.
//!
//! [`ElementWatcher::check`] takes one observation pass and reports what
//! changed since the previous pass; [`ElementWatcher::run`] repeats it on an
//! interval. Listeners registered with [`ElementWatcher::subscribe`] receive
//! every event either way.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use waypoint_core::element::ElementSelector;
use waypoint_events::evented::{Evented, Subscription};

use super::document::Document;
use super::finder::find_element;
use super::visibility::is_visible;
use crate::error::{SdkError, SdkResult};

/// Longest a watcher may wait before reporting a timeout.
pub const MAX_WATCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementEvent<N> {
    /// A visible element matched.
    Found(N),
    /// Nothing visible matched within the timeout. Reported once.
    Timeout,
    /// The descriptor now resolves to a different element.
    Changed(N),
}

pub struct ElementWatcher<N> {
    selector: ElementSelector,
    timeout: Duration,
    started_at: Instant,
    last: Option<N>,
    present: bool,
    timed_out: bool,
    events: Evented<ElementEvent<N>>,
}

impl<N> ElementWatcher<N>
where
    N: Clone + Eq + Send + Sync + 'static,
{
    /// Rejects a `timeout` above [`MAX_WATCH_TIMEOUT`].
    pub fn new(selector: ElementSelector, timeout: Duration) -> SdkResult<Self> {
        if timeout > MAX_WATCH_TIMEOUT {
            return Err(SdkError::Config(format!(
                "element timeout of {}ms exceeds the {}ms limit",
                timeout.as_millis(),
                MAX_WATCH_TIMEOUT.as_millis()
            )));
        }
        Ok(Self {
            selector,
            timeout,
            started_at: Instant::now(),
            last: None,
            present: false,
            timed_out: false,
            events: Evented::new(),
        })
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ElementEvent<N>) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// The element currently matched, if it is visible.
    pub fn current(&self) -> Option<&N> {
        if self.present {
            self.last.as_ref()
        } else {
            None
        }
    }

    pub fn has_timed_out(&self) -> bool {
        self.timed_out
    }

    /// One observation pass.
    pub fn check<D>(&mut self, doc: &D) -> Option<ElementEvent<N>>
    where
        D: Document<Node = N>,
    {
        let found = find_element(doc, &self.selector).filter(|n| is_visible(doc, n));

        let event = match found {
            Some(node) => {
                let event = match &self.last {
                    Some(last) if *last != node => Some(ElementEvent::Changed(node.clone())),
                    _ if !self.present => Some(ElementEvent::Found(node.clone())),
                    _ => None,
                };
                self.last = Some(node);
                self.present = true;
                event
            }
            None => {
                self.present = false;
                let never_found = self.last.is_none();
                if never_found && !self.timed_out && self.started_at.elapsed() >= self.timeout {
                    self.timed_out = true;
                    Some(ElementEvent::Timeout)
                } else {
                    None
                }
            }
        };

        if let Some(event) = &event {
            self.events.emit(event);
        }
        event
    }

    /// Poll `doc` every `interval` until cancelled.
    pub async fn run<D>(&mut self, doc: &D, interval: Duration, cancel: &CancellationToken)
    where
        D: Document<Node = N>,
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.check(doc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::element::document::{MemoryDocument, NodeId};

    fn watcher(timeout: Duration) -> ElementWatcher<NodeId> {
        ElementWatcher::new(ElementSelector::manual("#target"), timeout).expect("watcher")
    }

    #[test]
    fn rejects_timeouts_over_the_cap() {
        let result = ElementWatcher::<NodeId>::new(
            ElementSelector::manual("#target"),
            Duration::from_secs(11),
        );
        assert!(matches!(result, Err(SdkError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn found_then_changed() {
        let mut doc = MemoryDocument::new();
        let mut watcher = watcher(Duration::from_secs(5));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = watcher.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        assert_eq!(watcher.check(&doc), None);

        let first = doc.append(None, &["#target"]);
        assert_eq!(watcher.check(&doc), Some(ElementEvent::Found(first)));
        assert_eq!(watcher.check(&doc), None, "no repeat for the same element");

        doc.remove(first);
        let second = doc.append(None, &["#target"]);
        assert_eq!(watcher.check(&doc), Some(ElementEvent::Changed(second)));
        assert_eq!(watcher.current(), Some(&second));

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_once() {
        let doc = MemoryDocument::new();
        let mut watcher = watcher(Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(watcher.check(&doc), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(watcher.check(&doc), Some(ElementEvent::Timeout));
        assert_eq!(watcher.check(&doc), None);
        assert!(watcher.has_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn reappearing_element_is_found_again() {
        let mut doc = MemoryDocument::new();
        let mut watcher = watcher(Duration::from_secs(2));
        let target = doc.append(None, &["#target"]);
        assert_eq!(watcher.check(&doc), Some(ElementEvent::Found(target)));

        doc.set_style(
            target,
            crate::element::document::ComputedStyle {
                display_none: true,
                ..Default::default()
            },
        );
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(watcher.check(&doc), None, "no timeout after a match");
        assert_eq!(watcher.current(), None);

        doc.set_style(target, Default::default());
        assert_eq!(watcher.check(&doc), Some(ElementEvent::Found(target)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let doc = MemoryDocument::new();
        let mut watcher = watcher(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            stop.cancel();
        });

        watcher.run(&doc, DEFAULT_POLL_INTERVAL, &cancel).await;
        assert!(watcher.has_timed_out());
    }
}
