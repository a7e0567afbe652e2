//! Conversation-history compression.
//!
//! Bounds the token size of a message history before dispatch to the
//! model: the system message and the most recent turns survive
//! verbatim, the older prefix is replaced by a single summary message,
//! and a plain truncation strategy covers summarization failures.

mod history;

pub use history::CompressionConfig;
pub use history::Message;
pub use history::Role;
pub use history::Summarizer;
pub use history::compress;
pub use history::estimate_tokens;
