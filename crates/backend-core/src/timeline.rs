use crate::types::ChatMessage;

/// Insertion-ordered message log for one room with bounded retention.
///
/// Deliveries are appended exactly as the transport hands them over. A message
/// redelivered after a reconnect race shows up twice.
#[derive(Debug, Clone)]
pub struct MessageLog {
    items: Vec<ChatMessage>,
    max_items: usize,
}

impl MessageLog {
    /// Create a message log with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current messages in arrival order.
    pub fn items(&self) -> &[ChatMessage] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Newest message, which the view scrolls to.
    pub fn latest(&self) -> Option<&ChatMessage> {
        self.items.last()
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.items.push(message);
        self.trim_to_max();
    }

    /// Replace the whole log, for example with freshly loaded history.
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.items = messages;
        self.trim_to_max();
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn trim_to_max(&mut self) {
        if self.items.len() <= self.max_items {
            return;
        }

        let excess = self.items.len() - self.max_items;
        self.items.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> ChatMessage {
        ChatMessage {
            message_type: None,
            room_id: Some(1),
            sender_email: "alice@example.com".to_owned(),
            message: body.to_owned(),
            update_time: None,
        }
    }

    #[test]
    fn keeps_arrival_order() {
        let mut log = MessageLog::new(10);
        log.append(message("one"));
        log.append(message("two"));

        let bodies: Vec<&str> = log.items().iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
        assert_eq!(log.latest().map(|m| m.message.as_str()), Some("two"));
    }

    #[test]
    fn duplicate_deliveries_are_kept() {
        let mut log = MessageLog::new(10);
        log.append(message("same"));
        log.append(message("same"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn history_replaces_existing_items() {
        let mut log = MessageLog::new(10);
        log.append(message("stale"));
        log.replace_all(vec![message("a"), message("b")]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.items()[0].message, "a");
    }

    #[test]
    fn trims_oldest_when_over_max_items() {
        let mut log = MessageLog::new(2);
        log.append(message("one"));
        log.append(message("two"));
        log.append(message("three"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.items()[0].message, "two");
        assert_eq!(log.items()[1].message, "three");
    }
}
