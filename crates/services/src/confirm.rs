//! Confirmation prompts as plain values.
//!
//! A prompt carries the command it guards. The caller shows the title and
//! message, then either `confirm`s to get the command back for execution or
//! `cancel`s to drop it. Nothing is stashed between the two steps.

use serde::{Deserialize, Serialize};

/// A pending action awaiting the participant's confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation<A> {
    title: String,
    message: String,
    action: A,
}

impl<A> Confirmation<A> {
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>, action: A) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            action,
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn action(&self) -> &A {
        &self.action
    }

    /// Accept the prompt and take the command to execute.
    #[must_use]
    pub fn confirm(self) -> A {
        self.action
    }

    /// Dismiss the prompt. The command is dropped unexecuted.
    pub fn cancel(self) {}
}

/// Commands an open attempt accepts after confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptCommand {
    /// Score and record the current answers.
    Submit,
    /// Leave the attempt without recording anything. A running countdown keeps going.
    Exit,
}
