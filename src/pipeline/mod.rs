//! Wire-format decoding and retry policy.
//!
//! ```text
//! bytes ─► Utf8Decoder ─► FrameDecoder (SSE | NDJSON) ─► frames ─► adapter mapping
//!                                   ▲
//!                          RetryPolicy decides re-attempts around it
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | [`SseParser`] and [`NdjsonDecoder`] |
//! | [`retry`] | [`RetryPolicy`] and the jittered backoff calculator |

pub mod decode;
pub mod retry;

pub use decode::{NdjsonDecoder, ParsedSseEvent, SseParser};
pub use retry::{RetryPolicy, DEFAULT_RETRY_POLICY};

/// Incremental text-to-frame decoder driven by the stream executor.
///
/// Implementations own their buffer exclusively; one instance serves exactly one stream
/// attempt and is dropped with it.
pub trait FrameDecoder: Send + 'static {
    type Frame: Send + 'static;

    /// Append a chunk and return the frames it completed.
    fn feed(&mut self, chunk: &str) -> Vec<Self::Frame>;

    /// Parse the final, unterminated frame (if any) and clear the buffer.
    fn flush_remainder(&mut self) -> Vec<Self::Frame>;
}
