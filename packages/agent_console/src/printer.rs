//! Incremental plain-text rendering of a chat transcript.
//!
//! The transcript only ever grows at its tail, so the printer keeps a cursor
//! (message, part, byte offset) and on each call writes just what appeared
//! since the last one. A new epoch (agent switch) starts over.

use crate::chat::ChatView;
use agent_stream::{ASK_QUESTION, EXECUTE_COMMAND, Entity, FunctionCall, Message, Sender};
use std::io::{self, Write};

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    message: usize,
    part: usize,
    /// Bytes of the current text part already written.
    offset: usize,
    part_started: bool,
    result_shown: bool,
}

pub struct TranscriptPrinter<W: Write> {
    out: W,
    color: bool,
    epoch: Option<u64>,
    cursor: Cursor,
    at_line_start: bool,
}

impl<W: Write> TranscriptPrinter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            epoch: None,
            cursor: Cursor::default(),
            at_line_start: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write everything new in `view` since the previous call.
    pub fn render(&mut self, view: &ChatView) -> io::Result<()> {
        if self.epoch != Some(view.epoch) {
            self.epoch = Some(view.epoch);
            self.cursor = Cursor::default();
            self.end_line()?;
        }

        let messages = view.transcript.messages();
        while let Some(message) = messages.get(self.cursor.message) {
            let is_last_message = self.cursor.message + 1 == messages.len();
            if message.sender == Sender::Bot {
                self.render_message(message, is_last_message)?;
            }
            if is_last_message {
                break;
            }
            self.cursor = Cursor {
                message: self.cursor.message + 1,
                ..Cursor::default()
            };
        }
        self.out.flush()
    }

    fn render_message(&mut self, message: &Message, is_last_message: bool) -> io::Result<()> {
        while let Some(part) = message.parts.get(self.cursor.part) {
            let is_live = is_last_message && self.cursor.part + 1 == message.parts.len();
            self.render_part(part)?;
            if is_live {
                break;
            }
            if self.cursor.part_started {
                self.end_line()?;
            }
            self.cursor = Cursor {
                message: self.cursor.message,
                part: self.cursor.part + 1,
                ..Cursor::default()
            };
        }
        Ok(())
    }

    fn render_part(&mut self, part: &Entity) -> io::Result<()> {
        match part {
            Entity::Text { content, .. } => self.stream(content, false),
            Entity::Thinking { content, .. } => self.stream(content, true),
            Entity::FunctionCall(call) if call.name == EXECUTE_COMMAND => self.command(call),
            Entity::FunctionCall(call) if call.name == ASK_QUESTION => self.question(call),
            _ => Ok(()),
        }
    }

    fn stream(&mut self, content: &str, dim: bool) -> io::Result<()> {
        let Some(rest) = content.get(self.cursor.offset..) else {
            return Ok(());
        };
        if rest.is_empty() {
            return Ok(());
        }
        if !self.cursor.part_started {
            self.end_line()?;
        }
        if dim && self.color {
            write!(self.out, "{DIM}{rest}{RESET}")?;
        } else {
            self.out.write_all(rest.as_bytes())?;
        }
        self.at_line_start = rest.ends_with('\n');
        self.cursor.offset = content.len();
        self.cursor.part_started = true;
        Ok(())
    }

    fn command(&mut self, call: &FunctionCall) -> io::Result<()> {
        if !self.cursor.part_started {
            self.end_line()?;
            let command = call.str_argument("command").unwrap_or_default();
            self.emit(&format!("$ {command}\n"))?;
            self.cursor.part_started = true;
        }
        if let Some(result) = &call.result {
            if !self.cursor.result_shown {
                self.emit(result)?;
                self.cursor.result_shown = true;
            }
        }
        Ok(())
    }

    fn question(&mut self, call: &FunctionCall) -> io::Result<()> {
        if self.cursor.part_started {
            return Ok(());
        }
        self.end_line()?;
        let question = call.str_argument("question").unwrap_or_default();
        self.emit(&format!("{question}\n"))?;
        let choices = call
            .arguments
            .get("answerChoices")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for (i, choice) in choices.iter().enumerate() {
            let label = choice
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| choice.to_string());
            self.emit(&format!("  {}) {label}\n", i + 1))?;
        }
        self.emit("(answer with /choose N)\n")?;
        self.cursor.part_started = true;
        Ok(())
    }

    fn emit(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.out.write_all(text.as_bytes())?;
        self.at_line_start = text.ends_with('\n');
        Ok(())
    }

    fn end_line(&mut self) -> io::Result<()> {
        if !self.at_line_start {
            self.emit("\n")?;
        }
        Ok(())
    }
}
