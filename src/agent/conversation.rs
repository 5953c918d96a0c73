//! Append-only conversation log for one generation run

use crate::models::ChatMessage;

/// Ordered history owned by a single Generation Loop invocation.
///
/// Entries are never rewritten; a turn produces a tail that is appended.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// System instructions followed by the user request.
    pub fn seed(system: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(request)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn extend(&mut self, tail: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_tail_is_appended_after_seed() {
        let mut conversation = Conversation::seed("rubric", "assess AAPL");
        let prefix = conversation.messages().to_vec();

        conversation.extend(vec![ChatMessage::assistant(Some("thinking".into()), vec![])]);

        assert_eq!(conversation.len(), 3);
        assert_eq!(&conversation.messages()[..2], prefix.as_slice());
        assert_eq!(conversation.messages()[2].role, Role::Assistant);
    }
}
