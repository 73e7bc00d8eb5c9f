//! Core data types shared by executors, adapters and callers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Chat turn with role, content and optional name |
//! | [`ModelOptions`] | Immutable per-call options |
//! | [`StreamEvent`] | Unified streaming event |
//! | [`EventEmitter`] | Channel wrapper enforcing one terminal event per request |
//! | [`ToolDefinition`] / [`ToolCall`] | Function calling |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_relay::types::{Message, ModelOptions, ToolDefinition};
//!
//! let messages = vec![
//!     Message::system("You are terse."),
//!     Message::user("What's the weather?"),
//! ];
//! let options = ModelOptions::new("gpt-4o-mini")
//!     .temperature(0.2)
//!     .tools(vec![ToolDefinition::new("get_weather")
//!         .with_parameters(serde_json::json!({"type": "object"}))]);
//! assert_eq!(options.tools.len(), 1);
//! assert_eq!(messages.len(), 2);
//! ```

pub mod events;
pub mod message;
pub mod options;
pub mod tool;

pub use events::{EventEmitter, EventSender, StreamEvent, Usage};
pub use message::{Message, MessageRole};
pub use options::{ImageInput, ModelOptions};
pub use tool::{ToolCall, ToolDefinition};
