//! Conversation history for the interactive client.
//!
//! A [`Transcript`] lives for one run of the client. It replays recent
//! exchanges into new queries and can mirror every exchange to a JSON log
//! keyed by session id.
//!
//! # Example
//!
//! ```rust
//! use mcp_multiclient::session::Transcript;
//!
//! let mut transcript = Transcript::with_session_id("session_demo", None);
//! transcript.record("Hello!", "Hi there.").unwrap();
//!
//! assert_eq!(transcript.history_messages(10).len(), 2);
//! ```

mod transcript;

pub use transcript::{Exchange, Transcript};
