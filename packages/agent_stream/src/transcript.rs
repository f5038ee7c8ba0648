use crate::types::{ASK_QUESTION, Entity, Message, Sender};
use serde::Serialize;
use serde_json::Value;

/// Chronological list of messages for one session.
///
/// Only the reducer functions in [`crate::reducer`] mutate it; everyone else
/// reads through the accessors below or holds a cloned snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }
}

/// A multiple-choice question the agent is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPrompt {
    pub question: String,
    pub choices: Vec<String>,
}

/// True when the next user reply answers a question rather than starting a
/// new request: the last message is from the bot and ends in an
/// `askQuestion` call.
pub fn pending_choice_prompt(transcript: &Transcript) -> bool {
    pending_call(transcript).is_some()
}

/// The open `askQuestion`, if one is the last part of the last message.
pub fn pending_question(transcript: &Transcript) -> Option<QuestionPrompt> {
    let call = pending_call(transcript)?;
    let question = call.str_argument("question").unwrap_or_default().to_string();
    let choices = call
        .arguments
        .get("answerChoices")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(QuestionPrompt { question, choices })
}

fn pending_call(transcript: &Transcript) -> Option<&crate::types::FunctionCall> {
    let last = transcript.last()?;
    if last.sender != Sender::Bot {
        return None;
    }
    match last.last_part()? {
        Entity::FunctionCall(call) if call.name == ASK_QUESTION => Some(call),
        _ => None,
    }
}
