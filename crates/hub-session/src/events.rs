//! Unified event stream for the session
//!
//! Frames, state changes and errors all reach the presentation layer through
//! one channel, in the order the session produced them.

use crate::error::SessionError;
use crate::state::StateSnapshot;

/// Everything the session reports to its observer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One complete, trimmed message from the device
    FrameReceived {
        /// Decoded text with the prompt removed
        text: String,
    },

    /// The connection state changed
    StateChanged(StateSnapshot),

    /// Something failed; the state may or may not have changed with it
    Error {
        /// What went wrong
        error: SessionError,
    },
}

impl SessionEvent {
    pub fn frame_text(&self) -> Option<&str> {
        match self {
            SessionEvent::FrameReceived { text } => Some(text),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> Option<StateSnapshot> {
        match self {
            SessionEvent::StateChanged(snapshot) => Some(*snapshot),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionEvent::Error { error } => Some(error),
            _ => None,
        }
    }
}
