//! Bounded conversation memory.
//!
//! A [`Session`] is owned by the caller (one per chat, user or client) and
//! passed into every question, so conversations never leak into each other.

use std::{collections::VecDeque, sync::Mutex};

use serde::Serialize;

use crate::config::{DEFAULT_HISTORY_CAPACITY, DEFAULT_HISTORY_WINDOW};

/// One question and the answer it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Chronological turns, oldest first, evicted FIFO past `capacity`.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    capacity: usize,
    window: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_HISTORY_WINDOW)
    }
}

impl ConversationHistory {
    pub fn new(capacity: usize, window: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn record(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(Turn {
            question: question.into(),
            answer: answer.into(),
        });
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    /// The question with the most recent `window` turns prepended.
    ///
    /// With no history the question is returned verbatim.
    ///
    /// # Examples
    ///
    /// ```
    /// use curatex::history::ConversationHistory;
    ///
    /// let mut history = ConversationHistory::default();
    /// assert_eq!(history.augment("Who won?"), "Who won?");
    ///
    /// history.record("Who played?", "Team A and Team B.");
    /// let prompt = history.augment("Who won?");
    /// assert!(prompt.contains("User: Who played?\nAssistant: Team A and Team B."));
    /// assert!(prompt.contains("Current question: Who won?"));
    /// ```
    pub fn augment(&self, question: &str) -> String {
        if self.turns.is_empty() || self.window == 0 {
            return question.to_string();
        }

        let skip = self.turns.len().saturating_sub(self.window);
        let exchanges: Vec<String> = self
            .turns
            .iter()
            .skip(skip)
            .map(|t| format!("User: {}\nAssistant: {}", t.question, t.answer))
            .collect();

        format!(
            "Previous conversation:\n{}\n\nCurrent question: {question}\n\n\
             Please answer the current question, considering the conversation context above.",
            exchanges.join("\n")
        )
    }
}

/// A caller-owned conversation, safe to share between concurrent questions.
///
/// The lock covers only reading the history for augmentation and appending
/// a finished turn; retrieval and completion run outside it.
#[derive(Debug, Default)]
pub struct Session {
    history: Mutex<ConversationHistory>,
}

impl Session {
    pub fn new(capacity: usize, window: usize) -> Self {
        Self {
            history: Mutex::new(ConversationHistory::new(capacity, window)),
        }
    }

    pub fn augment(&self, question: &str) -> String {
        self.lock().augment(question)
    }

    pub fn record(&self, question: &str, answer: &str) {
        self.lock().record(question, answer);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Copy of the current history.
    pub fn snapshot(&self) -> ConversationHistory {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConversationHistory> {
        // Every mutation is a single push or pop, so poisoned data is intact.
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}
