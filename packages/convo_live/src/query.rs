use crate::types::{Message, MessageMetadata, MessageRole, Question};
use chrono::{DateTime, Utc};

pub struct TranscriptQuery<'a> {
    messages: &'a [Message],
}

impl<'a> TranscriptQuery<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        Self { messages }
    }

    pub fn by_role(&self, role: MessageRole) -> Vec<&'a Message> {
        self.messages.iter().filter(|m| m.role == role).collect()
    }

    pub fn by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&'a Message> {
        self.messages
            .iter()
            .filter(|m| m.created_at >= start && m.created_at <= end)
            .collect()
    }

    pub fn contains_text(&self, search: &str) -> Vec<&'a Message> {
        let search_lower = search.to_lowercase();
        self.messages
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&search_lower))
            .collect()
    }

    /// Status-typed entries in transcript order: narration synthesized from
    /// live status events plus persisted messages carrying status metadata.
    pub fn status_entries(&self) -> Vec<&'a Message> {
        self.messages.iter().filter(|m| m.is_status()).collect()
    }

    /// Questions from the latest `questions` message, unless a
    /// `question_answers` message came after it.
    pub fn pending_questions(&self) -> &'a [Question] {
        for message in self.messages.iter().rev() {
            match &message.metadata {
                Some(MessageMetadata::QuestionAnswers { .. }) => return &[],
                Some(MessageMetadata::Questions { questions }) => return questions,
                _ => {}
            }
        }
        &[]
    }

    pub fn last_completion(&self) -> Option<&'a Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.metadata, Some(MessageMetadata::Completion { .. })))
    }

    pub fn errors(&self) -> Vec<&'a Message> {
        self.messages
            .iter()
            .filter(|m| matches!(m.metadata, Some(MessageMetadata::Error { .. })))
            .collect()
    }
}
