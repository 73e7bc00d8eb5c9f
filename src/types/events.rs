//! Unified stream events and the emitter that enforces their ordering contract.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::tool::ToolCall;
use crate::Error;

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Event delivered to the caller for one logical request.
///
/// Order: `Start → Handshake? → FirstByte? → Delta* → Usage? → Done`, or a single
/// `Error` in place of any suffix. Nothing follows `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start,
    /// Response headers arrived with a success status
    Handshake,
    /// First non-empty body chunk arrived
    FirstByte,
    Delta {
        text: String,
    },
    ToolCall {
        call: ToolCall,
    },
    /// The model stopped to wait for the results of these tool calls
    ToolResultRequest {
        call_ids: Vec<String>,
    },
    Usage(Usage),
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
    Error(Error),
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::Delta { text: text.into() }
    }

    pub fn done(finish_reason: impl Into<String>) -> Self {
        StreamEvent::Done {
            finish_reason: Some(finish_reason.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error(_))
    }
}

/// Sending half given to adapters; the caller keeps the receiver.
pub type EventSender = mpsc::UnboundedSender<StreamEvent>;

/// Wraps the caller's channel and drops every event after the first terminal one.
#[derive(Debug)]
pub struct EventEmitter {
    request_id: String,
    tx: EventSender,
    terminated: AtomicBool,
}

impl EventEmitter {
    pub fn new(request_id: impl Into<String>, tx: EventSender) -> Self {
        Self {
            request_id: request_id.into(),
            tx,
            terminated: AtomicBool::new(false),
        }
    }

    /// Convenience constructor returning the emitter and the caller's receiver.
    pub fn channel(
        request_id: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(request_id, tx), rx)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns `false` when the event was dropped because the request already ended.
    pub fn emit(&self, event: StreamEvent) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::SeqCst) {
                return false;
            }
        } else if self.terminated.load(Ordering::SeqCst) {
            return false;
        }
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(event);
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
