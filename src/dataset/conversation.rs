//! Conversation records used as classification training examples.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::codec;
use crate::error::CodecError;

/// Role name of the turn that carries the question.
pub const USER_ROLE: &str = "user";
/// Role name of the turn that carries the ground-truth category.
pub const ASSISTANT_ROLE: &str = "assistant";

/// A single turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker role ("user" or "assistant").
    pub from: String,
    /// Turn text.
    pub value: String,
}

impl Turn {
    pub fn user(value: impl Into<String>) -> Self {
        Self {
            from: USER_ROLE.to_string(),
            value: value.into(),
        }
    }

    pub fn assistant(value: impl Into<String>) -> Self {
        Self {
            from: ASSISTANT_ROLE.to_string(),
            value: value.into(),
        }
    }
}

/// A question/answer pair: turn 0 asks, turn 1 answers.
///
/// Unknown top-level keys are preserved so stages never drop data they do not
/// understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversations: Vec<Turn>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Conversation {
    /// Creates a user/assistant conversation.
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            conversations: vec![Turn::user(question), Turn::assistant(answer)],
            extra: Map::new(),
        }
    }

    /// Returns the question text, if the conversation has a first turn.
    pub fn question(&self) -> Option<&str> {
        self.conversations.first().map(|turn| turn.value.as_str())
    }

    /// Returns the ground-truth answer, if the conversation has a second turn.
    pub fn answer(&self) -> Option<&str> {
        self.conversations.get(1).map(|turn| turn.value.as_str())
    }

    /// Returns true if both the question and the answer turns are present.
    pub fn is_complete(&self) -> bool {
        self.conversations.len() >= 2
    }

    pub fn set_question(&mut self, question: impl Into<String>) {
        if let Some(turn) = self.conversations.first_mut() {
            turn.value = question.into();
        }
    }

    pub fn set_answer(&mut self, answer: impl Into<String>) {
        if let Some(turn) = self.conversations.get_mut(1) {
            turn.value = answer.into();
        }
    }

    /// Parses the candidate list embedded in the question.
    pub fn candidates(&self) -> Result<Vec<String>, CodecError> {
        let question = self.question().ok_or(CodecError::MissingDelimiter)?;
        codec::extract(question)
    }

    /// Re-renders the question with a new candidate list.
    pub fn set_candidates<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), CodecError> {
        let question = self.question().ok_or(CodecError::MissingDelimiter)?;
        let rebuilt = codec::rebuild(question, names)?;
        self.set_question(rebuilt);
        Ok(())
    }
}

/// Returns the ground-truth labels of every complete conversation, in order.
pub fn labels(dataset: &[Conversation]) -> Vec<&str> {
    dataset.iter().filter_map(Conversation::answer).collect()
}

/// Counts how often each ground-truth label occurs.
pub fn label_counts(dataset: &[Conversation]) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for label in labels(dataset) {
        *counts.entry(label.to_string()).or_insert(0) += 1;
    }
    counts
}
