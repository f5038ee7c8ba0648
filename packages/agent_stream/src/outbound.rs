use crate::transcript::{Transcript, pending_choice_prompt};
use crate::types::TerminalFrame;
use serde::{Deserialize, Serialize};

/// A frame sent to the service. Every one is stamped with the active agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub entity: OutboundEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OutboundMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMetadata {
    pub agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEntity {
    /// A new request typed by the user.
    #[serde(rename = "USR")]
    UserMessage { text: String },
    /// The user's answer to an `askQuestion`.
    #[serde(rename = "USER_CHOICE")]
    UserChoice { text: String },
    #[serde(rename = "TERMINAL")]
    Terminal(TerminalFrame),
}

/// How a text submission is tagged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Message,
    Choice,
}

impl ReplyKind {
    /// Decide from the transcript as it stood before the user's message was
    /// appended.
    pub fn for_transcript(transcript: &Transcript) -> Self {
        if pending_choice_prompt(transcript) {
            ReplyKind::Choice
        } else {
            ReplyKind::Message
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    pub fn is_zero(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

/// Builds outbound envelopes on behalf of one agent.
#[derive(Debug, Clone)]
pub struct OutboundComposer {
    agent: String,
}

impl OutboundComposer {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn compose_text(&self, text: &str, kind: ReplyKind) -> OutboundEnvelope {
        let text = text.to_string();
        let entity = match kind {
            ReplyKind::Message => OutboundEntity::UserMessage { text },
            ReplyKind::Choice => OutboundEntity::UserChoice { text },
        };
        self.wrap(entity)
    }

    pub fn compose_terminal_input(&self, data: &str) -> OutboundEnvelope {
        self.wrap(OutboundEntity::Terminal(TerminalFrame::output(data)))
    }

    pub fn compose_terminal_resize(&self, size: TerminalSize) -> OutboundEnvelope {
        self.wrap(OutboundEntity::Terminal(TerminalFrame::resize(
            size.cols, size.rows,
        )))
    }

    fn wrap(&self, entity: OutboundEntity) -> OutboundEnvelope {
        OutboundEnvelope {
            entity,
            metadata: Some(OutboundMetadata {
                agent: self.agent.clone(),
            }),
        }
    }
}
