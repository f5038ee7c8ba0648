//! # Agent Stream
//!
//! Wire types and the pure state machine behind a streaming agent session.
//!
//! ## Overview
//!
//! An agent service streams each turn as many small frames. Every frame is an
//! envelope carrying a stream id and one tagged entity:
//!
//! ```text
//! {"id": "turn-7", "entity": {"type": "TXT", "text": "Hel", "isLast": false}}
//! {"id": "turn-7", "entity": {"type": "TXT", "text": "lo",  "isLast": true}}
//! ```
//!
//! This crate provides:
//! - Typed entities and envelopes for both directions of the wire
//! - A lenient frame decoder that counts and drops malformed payloads
//! - A transcript reducer that folds frames into an append-only message list
//! - An outbound composer that stamps frames with the active agent
//!
//! It does no I/O; the connection lives in `agent_console`.
//!
//! ## Quick Start
//!
//! ```rust
//! use agent_stream::{Sender, Transcript, decode, reduce};
//!
//! let mut transcript = Transcript::new();
//! for raw in [
//!     r#"{"id":"t1","entity":{"type":"TXT","text":"Hel","isLast":false}}"#,
//!     r#"{"id":"t1","entity":{"type":"TXT","text":"lo","isLast":true}}"#,
//! ] {
//!     let envelope = decode(raw)?;
//!     reduce(&mut transcript, &envelope, Sender::Bot);
//! }
//!
//! assert_eq!(transcript.len(), 1);
//! assert_eq!(transcript.messages()[0].text(), "Hello");
//! # Ok::<(), agent_stream::DecodeError>(())
//! ```
//!
//! ## Replying
//!
//! ```rust
//! use agent_stream::{OutboundComposer, ReplyKind, Transcript};
//!
//! let transcript = Transcript::new();
//! let composer = OutboundComposer::new("basic-chat");
//! let frame = composer.compose_text("hi", ReplyKind::for_transcript(&transcript));
//! let json = serde_json::to_string(&frame).unwrap();
//! assert!(json.contains(r#""type":"USR""#));
//! ```

pub mod decoder;
pub mod error;
pub mod outbound;
pub mod reducer;
pub mod route;
pub mod transcript;
pub mod types;

pub use decoder::{DecoderStats, FrameDecoder, decode, decode_bytes};
pub use error::{DecodeError, Result};
pub use outbound::{
    OutboundComposer, OutboundEntity, OutboundEnvelope, OutboundMetadata, ReplyKind, TerminalSize,
};
pub use reducer::{append_message, append_placeholder, reduce, reduce_at, reset};
pub use route::SubProtocol;
pub use transcript::{QuestionPrompt, Transcript, pending_choice_prompt, pending_question};
pub use types::{
    ASK_QUESTION, EXECUTE_COMMAND, Entity, Envelope, FunctionCall, FunctionResult, Message, Sender,
    TerminalFrame,
};
