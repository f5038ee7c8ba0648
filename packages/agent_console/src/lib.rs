//! # Agent Console
//!
//! Client side of a streaming agent service: one WebSocket, two consumers.
//!
//! A [`TransportManager`] owns the connection and fans decoded frames out to
//! subscribers. A [`ChatSession`] folds chat frames into a transcript; a
//! [`TerminalChannel`] pipes terminal frames to a [`TerminalSurface`]. The
//! two never see each other's frames.
//!
//! ```rust,no_run
//! use agent_console::{ActiveAgent, AgentCatalog, ChatSession, TransportManager};
//!
//! # async fn demo() {
//! let transport = TransportManager::new("ws://localhost:7070/ws");
//! let (session, _sub) = ChatSession::attach(
//!     &transport,
//!     ActiveAgent::new("basic-chat"),
//!     AgentCatalog::default(),
//! );
//! transport.connect();
//! session.submit_text("What is in my home directory?");
//! # }
//! ```

pub mod agent;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod printer;
pub mod reconnect;
pub mod router;
pub mod stats;
pub mod subscribers;
pub mod terminal;
pub mod transport;

pub use agent::{ActiveAgent, AgentCatalog};
pub use chat::{ChatSession, ChatView, LinkStatus};
pub use config::{ConsoleConfig, FileConfig, derive_endpoint, load_config};
pub use error::{ChoiceError, TransportError};
pub use printer::TranscriptPrinter;
pub use reconnect::{ReconnectPolicy, Reconnector};
pub use stats::TransportStatsSnapshot;
pub use subscribers::Subscription;
pub use terminal::{TerminalChannel, TerminalSurface};
pub use transport::{ConnectionState, FrameSink, TransportEvent, TransportManager};
