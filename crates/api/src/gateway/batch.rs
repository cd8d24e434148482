use waypoint_core::protocol::ClientMessage;

/// Upper bound on messages buffered between `BeginBatch` and `EndBatch`.
pub const MAX_BATCH_MESSAGES: usize = 256;

/// Buffer for messages bracketed by `BeginBatch`/`EndBatch`.
///
/// Nested `BeginBatch` frames extend the open batch. Nothing buffered here
/// takes effect until [`BatchBuffer::end`] hands the messages back; a
/// connection that drops mid-batch simply discards the buffer.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    open: bool,
    messages: Vec<ClientMessage>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        if self.open {
            tracing::debug!(buffered = self.messages.len(), "Nested BeginBatch, extending open batch");
        }
        self.open = true;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Buffer a message. Returns `false` if the batch is full and the
    /// message was dropped.
    pub fn push(&mut self, message: ClientMessage) -> bool {
        if self.messages.len() >= MAX_BATCH_MESSAGES {
            tracing::warn!(kind = message.kind(), "Batch is full, dropping message");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Close the batch and take its messages. `None` when no batch is open.
    pub fn end(&mut self) -> Option<Vec<ClientMessage>> {
        if !self.open {
            return None;
        }
        self.open = false;
        Some(std::mem::take(&mut self.messages))
    }

    /// Drop the open batch, returning how many messages were discarded.
    pub fn discard(&mut self) -> usize {
        self.open = false;
        let dropped = self.messages.len();
        self.messages.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::protocol::SessionRef;

    fn hide() -> ClientMessage {
        ClientMessage::HideChecklist(SessionRef {
            session_id: "s1".into(),
        })
    }

    #[test]
    fn end_without_begin_is_none() {
        let mut batch = BatchBuffer::new();
        assert!(batch.end().is_none());
    }

    #[test]
    fn end_returns_buffered_messages_in_order() {
        let mut batch = BatchBuffer::new();
        batch.begin();
        batch.push(ClientMessage::EndAllContent);
        batch.push(hide());

        let messages = batch.end().expect("open batch");
        assert_eq!(messages, vec![ClientMessage::EndAllContent, hide()]);
        assert!(!batch.is_open());
        assert!(batch.is_empty());
    }

    #[test]
    fn nested_begin_extends_batch() {
        let mut batch = BatchBuffer::new();
        batch.begin();
        batch.push(hide());
        batch.begin();
        batch.push(hide());
        assert_eq!(batch.end().map(|m| m.len()), Some(2));
    }

    #[test]
    fn discard_drops_everything() {
        let mut batch = BatchBuffer::new();
        batch.begin();
        batch.push(hide());
        assert_eq!(batch.discard(), 1);
        assert!(batch.end().is_none());
    }

    #[test]
    fn full_batch_rejects_messages() {
        let mut batch = BatchBuffer::new();
        batch.begin();
        for _ in 0..MAX_BATCH_MESSAGES {
            assert!(batch.push(hide()));
        }
        assert!(!batch.push(hide()));
        assert_eq!(batch.len(), MAX_BATCH_MESSAGES);
    }
}
