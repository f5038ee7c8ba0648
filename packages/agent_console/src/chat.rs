//! The transcript consumer.

use crate::agent::{ActiveAgent, AgentCatalog};
use crate::error::ChoiceError;
use crate::router::subscribe_family;
use crate::subscribers::Subscription;
use crate::transport::{FrameSink, TransportEvent, TransportManager};
use agent_stream::{
    Entity, QuestionPrompt, ReplyKind, Sender, SubProtocol, Transcript, append_message,
    append_placeholder, pending_question, reduce, reset,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Consistent read of the session: `epoch` changes whenever the transcript
/// is cleared, so incremental readers know to start over.
#[derive(Debug, Clone)]
pub struct ChatView {
    pub epoch: u64,
    pub status: LinkStatus,
    pub transcript: Transcript,
}

struct ChatState {
    transcript: Transcript,
    status: LinkStatus,
    epoch: u64,
}

pub struct ChatSession {
    sink: Arc<dyn FrameSink>,
    agent: ActiveAgent,
    catalog: AgentCatalog,
    state: Mutex<ChatState>,
    revision: watch::Sender<u64>,
}

impl ChatSession {
    pub fn new(sink: Arc<dyn FrameSink>, agent: ActiveAgent, catalog: AgentCatalog) -> Arc<Self> {
        let mut transcript = Transcript::new();
        append_message(
            &mut transcript,
            Some("init-0".to_string()),
            Sender::Bot,
            Entity::text(catalog.greeting(&agent.get()), true),
            Utc::now(),
        );
        let status = if sink.is_connected() {
            LinkStatus::Connected
        } else {
            LinkStatus::Connecting
        };
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            sink,
            agent,
            catalog,
            state: Mutex::new(ChatState {
                transcript,
                status,
                epoch: 0,
            }),
            revision,
        })
    }

    /// Create a session fed by the chat frames of `transport`. The session
    /// stops receiving events when the returned subscription is dropped.
    pub fn attach(
        transport: &Arc<TransportManager>,
        agent: ActiveAgent,
        catalog: AgentCatalog,
    ) -> (Arc<Self>, Subscription) {
        let sink: Arc<dyn FrameSink> = transport.clone();
        let session = Self::new(sink, agent, catalog);
        let weak = Arc::downgrade(&session);
        let subscription = subscribe_family(transport, SubProtocol::Chat, move |event| {
            if let Some(session) = weak.upgrade() {
                session.on_event(event);
            }
        });
        (session, subscription)
    }

    pub fn on_event(&self, event: &TransportEvent) {
        {
            let mut state = self.state.lock();
            match event {
                TransportEvent::Open => state.status = LinkStatus::Connected,
                TransportEvent::Frame(envelope) => {
                    if envelope.entity.sub_protocol() != SubProtocol::Chat {
                        return;
                    }
                    reduce(&mut state.transcript, envelope, Sender::Bot);
                }
                TransportEvent::Error(_) | TransportEvent::Close => {
                    state.status = LinkStatus::Disconnected;
                }
            }
        }
        self.bump();
    }

    /// Submit free text. Whitespace-only input is ignored. Returns whether
    /// the frame went out; the user message and the reply placeholder are
    /// appended either way.
    pub fn submit_text(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let sent = {
            let mut state = self.state.lock();
            let kind = ReplyKind::for_transcript(&state.transcript);
            self.submit_locked(&mut state, text, kind)
        };
        self.bump();
        sent
    }

    /// Answer the pending `askQuestion` with one of its choices.
    pub fn submit_choice(&self, answer: &str) -> Result<bool, ChoiceError> {
        let sent = {
            let mut state = self.state.lock();
            let question =
                pending_question(&state.transcript).ok_or(ChoiceError::NoPendingQuestion)?;
            if !question.choices.is_empty() && !question.choices.iter().any(|c| c == answer) {
                return Err(ChoiceError::UnknownChoice(answer.to_string()));
            }
            self.submit_locked(&mut state, answer, ReplyKind::Choice)
        };
        self.bump();
        Ok(sent)
    }

    // Held under the state lock so no inbound frame can land between the
    // user message and its placeholder.
    fn submit_locked(&self, state: &mut ChatState, text: &str, kind: ReplyKind) -> bool {
        let now = Utc::now();
        append_message(
            &mut state.transcript,
            Some(format!("user-{}", Uuid::new_v4())),
            Sender::User,
            Entity::text(text, true),
            now,
        );
        let frame = self.agent.composer().compose_text(text, kind);
        let sent = self.sink.send_frame(&frame);
        if !sent {
            debug!(?kind, "submission not sent, connection is down");
        }
        append_placeholder(&mut state.transcript, now);
        sent
    }

    /// Switch the active agent, clearing the transcript.
    pub fn switch_agent(&self, id: &str) {
        self.agent.set(id);
        {
            let mut state = self.state.lock();
            reset(&mut state.transcript);
            let now = Utc::now();
            append_message(
                &mut state.transcript,
                Some(format!("agent-switch-{}", now.timestamp_millis())),
                Sender::Bot,
                Entity::text(self.catalog.switched_message(id), true),
                now,
            );
            state.epoch += 1;
        }
        info!(agent = %id, "switched agent");
        self.bump();
    }

    pub fn pending_question(&self) -> Option<QuestionPrompt> {
        pending_question(&self.state.lock().transcript)
    }

    pub fn snapshot(&self) -> Transcript {
        self.state.lock().transcript.clone()
    }

    pub fn view(&self) -> ChatView {
        let state = self.state.lock();
        ChatView {
            epoch: state.epoch,
            status: state.status,
            transcript: state.transcript.clone(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.state.lock().status
    }

    pub fn agent(&self) -> String {
        self.agent.get()
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// Revision counter bumped after every change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AgentFileConfig;
    use agent_stream::{
        ASK_QUESTION, Envelope, FunctionCall, OutboundEntity, OutboundEnvelope, TerminalFrame,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records outbound frames instead of writing to a socket.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub connected: AtomicBool,
        pub frames: Mutex<Vec<OutboundEnvelope>>,
    }

    impl RecordingSink {
        pub(crate) fn connected() -> Arc<Self> {
            let sink = Arc::new(Self::default());
            sink.connected.store(true, Ordering::SeqCst);
            sink
        }

        pub(crate) fn sent(&self) -> Vec<OutboundEnvelope> {
            self.frames.lock().clone()
        }
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, frame: &OutboundEnvelope) -> bool {
            if !self.connected.load(Ordering::SeqCst) {
                return false;
            }
            self.frames.lock().push(frame.clone());
            true
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn session(sink: Arc<RecordingSink>) -> Arc<ChatSession> {
        ChatSession::new(
            sink,
            ActiveAgent::new("basic-chat"),
            AgentCatalog::from_file(&AgentFileConfig::default()),
        )
    }

    fn frame(id: Option<&str>, entity: Entity) -> TransportEvent {
        TransportEvent::Frame(Envelope::new(id, entity))
    }

    fn ask(choices: &[&str]) -> Entity {
        let args = json!({"question": "Which file?", "answerChoices": choices});
        Entity::FunctionCall(FunctionCall::new(
            ASK_QUESTION,
            args.as_object().unwrap().clone(),
        ))
    }

    #[test]
    fn test_initial_greeting() {
        let s = session(Arc::new(RecordingSink::default()));
        let t = s.snapshot();
        assert_eq!(t.len(), 1);
        let greeting = t.last().unwrap();
        assert_eq!(greeting.id.as_deref(), Some("init-0"));
        assert_eq!(greeting.sender, Sender::Bot);
        assert_eq!(
            greeting.text(),
            "I am Basic Chat agent. How can I help you today?"
        );
        assert_eq!(s.status(), LinkStatus::Connecting);
    }

    #[test]
    fn test_submit_appends_user_then_placeholder() {
        let sink = RecordingSink::connected();
        let s = session(sink.clone());
        assert!(s.submit_text("list files"));

        let t = s.snapshot();
        assert_eq!(t.len(), 3);
        let user = &t.messages()[1];
        assert_eq!(user.sender, Sender::User);
        assert!(user.id.as_deref().unwrap().starts_with("user-"));
        assert_eq!(user.text(), "list files");
        let placeholder = &t.messages()[2];
        assert!(placeholder.is_loading);
        assert!(placeholder.id.is_none());

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].entity,
            OutboundEntity::UserMessage {
                text: "list files".into()
            }
        );
        assert_eq!(sent[0].metadata.as_ref().unwrap().agent, "basic-chat");
    }

    #[test]
    fn test_submit_while_disconnected_still_records_locally() {
        let sink = Arc::new(RecordingSink::default());
        let s = session(sink.clone());
        assert!(!s.submit_text("hello"));
        assert_eq!(s.snapshot().len(), 3);
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_whitespace_is_ignored() {
        let sink = RecordingSink::connected();
        let s = session(sink.clone());
        assert!(!s.submit_text("   \n\t"));
        assert_eq!(s.snapshot().len(), 1);
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_reply_to_question_is_tagged_choice() {
        let sink = RecordingSink::connected();
        let s = session(sink.clone());
        s.on_event(&frame(Some("s1"), ask(&["a.txt", "b.txt"])));
        assert!(s.pending_question().is_some());

        s.submit_text("b.txt");
        assert_eq!(
            sink.sent()[0].entity,
            OutboundEntity::UserChoice {
                text: "b.txt".into()
            }
        );
        assert!(s.pending_question().is_none());

        // The placeholder is now last, so the next reply is a plain message.
        s.submit_text("thanks");
        assert!(matches!(
            sink.sent()[1].entity,
            OutboundEntity::UserMessage { .. }
        ));
    }

    #[test]
    fn test_submit_choice() {
        let sink = RecordingSink::connected();
        let s = session(sink.clone());
        assert_eq!(s.submit_choice("a.txt"), Err(ChoiceError::NoPendingQuestion));

        s.on_event(&frame(Some("s1"), ask(&["a.txt", "b.txt"])));
        assert_eq!(
            s.submit_choice("c.txt"),
            Err(ChoiceError::UnknownChoice("c.txt".into()))
        );
        assert_eq!(s.submit_choice("a.txt"), Ok(true));
        assert_eq!(
            sink.sent()[0].entity,
            OutboundEntity::UserChoice {
                text: "a.txt".into()
            }
        );
        // Answered: the question is no longer last.
        assert_eq!(s.submit_choice("b.txt"), Err(ChoiceError::NoPendingQuestion));
    }

    #[test]
    fn test_frames_reduce_into_placeholder() {
        let sink = RecordingSink::connected();
        let s = session(sink);
        s.submit_text("hi");
        s.on_event(&frame(Some("turn-1"), Entity::text("Hel", false)));
        s.on_event(&frame(Some("turn-1"), Entity::text("lo", true)));

        let t = s.snapshot();
        assert_eq!(t.len(), 3);
        let reply = t.last().unwrap();
        assert_eq!(reply.id.as_deref(), Some("turn-1"));
        assert_eq!(reply.parts, vec![Entity::text("Hello", true)]);
    }

    #[test]
    fn test_terminal_frames_never_touch_transcript() {
        let s = session(RecordingSink::connected());
        let before = s.snapshot();
        s.on_event(&frame(
            Some("t"),
            Entity::Terminal(TerminalFrame::output("$ ls\r\n")),
        ));
        assert_eq!(s.snapshot(), before);
    }

    #[test]
    fn test_status_follows_lifecycle() {
        let s = session(Arc::new(RecordingSink::default()));
        let mut changes = s.changes();
        s.on_event(&TransportEvent::Open);
        assert_eq!(s.status(), LinkStatus::Connected);
        assert!(changes.has_changed().unwrap());
        changes.mark_unchanged();

        s.on_event(&TransportEvent::Error("reset".into()));
        assert_eq!(s.status(), LinkStatus::Disconnected);
        s.on_event(&TransportEvent::Open);
        s.on_event(&TransportEvent::Close);
        assert_eq!(s.status(), LinkStatus::Disconnected);
        assert!(changes.has_changed().unwrap());
    }

    #[test]
    fn test_switch_agent_clears_and_greets() {
        let sink = RecordingSink::connected();
        let s = session(sink.clone());
        s.submit_text("hi");
        s.switch_agent("terminal-agent");

        let view = s.view();
        assert_eq!(view.epoch, 1);
        assert_eq!(view.transcript.len(), 1);
        let msg = view.transcript.last().unwrap();
        assert!(msg.id.as_deref().unwrap().starts_with("agent-switch-"));
        assert_eq!(msg.text(), "Switched to Tool Agent agent. How can I help you?");
        assert_eq!(s.agent(), "terminal-agent");

        s.submit_text("pwd");
        assert_eq!(
            sink.sent()[1].metadata.as_ref().unwrap().agent,
            "terminal-agent"
        );
    }
}
