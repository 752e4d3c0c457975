//! Streamed text reassembly
//!
//! Bot responses and transcripts arrive as deltas keyed by utterance id.
//! Each delta extends the tracked text; a final delta closes the entry and
//! yields the complete text once.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::messages::TextDelta;

/// Accumulated text for one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedResponse {
    pub utterance_id: String,
    pub text: String,
    pub is_final: bool,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl StreamedResponse {
    fn new(utterance_id: String) -> Self {
        Self {
            utterance_id,
            text: String::new(),
            is_final: false,
            started_at: Utc::now(),
            finalized_at: None,
        }
    }

    fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn finalize(mut self) -> Self {
        self.is_final = true;
        self.finalized_at = Some(Utc::now());
        self
    }
}

/// Consumer-visible text update: progress so far, or the finished utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextUpdate {
    pub utterance_id: String,
    pub text: String,
    pub is_final: bool,
}

impl From<&StreamedResponse> for TextUpdate {
    fn from(response: &StreamedResponse) -> Self {
        Self {
            utterance_id: response.utterance_id.clone(),
            text: response.text.clone(),
            is_final: response.is_final,
        }
    }
}

/// Tracks open utterances and folds deltas into them
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    open: HashMap<String, StreamedResponse>,
    completed: u64,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta and return the resulting update.
    ///
    /// A delta for an unknown id starts a new entry, so late or reordered
    /// deltas never fail.
    pub fn apply(&mut self, delta: TextDelta) -> TextUpdate {
        let TextDelta {
            utterance_id,
            text,
            is_final,
        } = delta;

        if is_final {
            let mut response = self
                .open
                .remove(&utterance_id)
                .unwrap_or_else(|| StreamedResponse::new(utterance_id));
            response.append(&text);
            let response = response.finalize();
            self.completed += 1;
            return TextUpdate::from(&response);
        }

        let response = self
            .open
            .entry(utterance_id.clone())
            .or_insert_with(|| StreamedResponse::new(utterance_id));
        response.append(&text);
        TextUpdate::from(&*response)
    }

    /// Text accumulated so far for an open utterance
    pub fn get(&self, utterance_id: &str) -> Option<&StreamedResponse> {
        self.open.get(utterance_id)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    /// Drop all open utterances, e.g. after the session is lost
    pub fn clear(&mut self) -> usize {
        let dropped = self.open.len();
        self.open.clear();
        dropped
    }
}
