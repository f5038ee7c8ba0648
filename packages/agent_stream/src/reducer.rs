//! Folding decoded envelopes into a [`Transcript`].
//!
//! For the last message `L` and an incoming envelope, exactly one rule
//! applies, checked in order:
//!
//! 1. `L.id` equals the (non-null) stream id: merge into `L`'s last part.
//! 2. `L` is an id-less loading placeholder: adopt the id and the entity.
//! 3. Otherwise: start a new message.

use crate::transcript::Transcript;
use crate::types::{Entity, Envelope, Message, Sender};
use chrono::{DateTime, Utc};
use tracing::trace;

pub fn reduce(transcript: &mut Transcript, envelope: &Envelope, sender: Sender) {
    reduce_at(transcript, envelope, sender, Utc::now());
}

/// [`reduce`] with an explicit timestamp for any message it creates.
pub fn reduce_at(
    transcript: &mut Transcript,
    envelope: &Envelope,
    sender: Sender,
    now: DateTime<Utc>,
) {
    if let Some(last) = transcript.last_mut() {
        let same_stream = envelope.stream_id.is_some() && last.id == envelope.stream_id;
        if same_stream {
            merge_into(last, &envelope.entity);
            last.is_loading = false;
            return;
        }
        if last.id.is_none() && last.is_loading {
            trace!(stream_id = ?envelope.stream_id, "placeholder adopted");
            last.id = envelope.stream_id.clone();
            last.parts = vec![envelope.entity.clone()];
            last.is_loading = false;
            return;
        }
    }
    append_message(
        transcript,
        envelope.stream_id.clone(),
        sender,
        envelope.entity.clone(),
        now,
    );
}

fn merge_into(message: &mut Message, incoming: &Entity) {
    let merged = match (message.parts.last_mut(), incoming) {
        (
            Some(Entity::Text { content, is_final }),
            Entity::Text {
                content: delta,
                is_final: incoming_final,
            },
        )
        | (
            Some(Entity::Thinking { content, is_final }),
            Entity::Thinking {
                content: delta,
                is_final: incoming_final,
            },
        ) => {
            content.push_str(delta);
            *is_final = *incoming_final;
            true
        }
        (Some(Entity::FunctionCall(call)), Entity::FunctionResult(res)) if call.name == res.name => {
            call.result = Some(res.result.clone());
            true
        }
        _ => false,
    };
    if !merged {
        message.parts.push(incoming.clone());
    }
}

/// Rule 3 unconditionally: used for locally originated messages, which must
/// never be adopted into a waiting placeholder.
pub fn append_message(
    transcript: &mut Transcript,
    id: Option<String>,
    sender: Sender,
    entity: Entity,
    now: DateTime<Utc>,
) {
    transcript.push(Message {
        id,
        sender,
        timestamp: now,
        is_loading: false,
        parts: vec![entity],
    });
}

/// Empty bot message that the next id-less frame will adopt.
pub fn append_placeholder(transcript: &mut Transcript, now: DateTime<Utc>) {
    transcript.push(Message {
        id: None,
        sender: Sender::Bot,
        timestamp: now,
        is_loading: true,
        parts: Vec::new(),
    });
}

/// Drop every message; used when the active agent changes.
pub fn reset(transcript: &mut Transcript) {
    transcript.clear();
}
