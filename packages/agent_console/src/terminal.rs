//! The terminal consumer: remote shell output in, keystrokes and resize
//! handshakes out.

use crate::agent::ActiveAgent;
use crate::router::subscribe_family;
use crate::subscribers::Subscription;
use crate::transport::{FrameSink, TransportEvent, TransportManager};
use agent_stream::{Entity, SubProtocol, TerminalFrame, TerminalSize};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

pub const CONNECTING_STATUS: &str = "Connecting to terminal service...";
pub const ERROR_BANNER: &str = "Error connecting to terminal service";
pub const CLOSED_BANNER: &str = "Terminal connection closed";

/// Whatever displays the remote terminal: an emulator widget, a raw tty.
pub trait TerminalSurface: Send {
    fn write(&mut self, data: &str);
}

/// Red status line on its own row.
pub fn banner(text: &str) -> String {
    format!("\r\n\x1b[31m{text}\x1b[0m\r\n")
}

struct TerminalState {
    surface: Box<dyn TerminalSurface>,
    visible: bool,
    measured: TerminalSize,
    /// Size last announced on the current connection; cleared on `Open`.
    last_sent: Option<TerminalSize>,
}

pub struct TerminalChannel {
    sink: Arc<dyn FrameSink>,
    agent: ActiveAgent,
    state: Mutex<TerminalState>,
}

impl TerminalChannel {
    pub fn new(
        sink: Arc<dyn FrameSink>,
        agent: ActiveAgent,
        surface: Box<dyn TerminalSurface>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sink,
            agent,
            state: Mutex::new(TerminalState {
                surface,
                visible: false,
                measured: TerminalSize::default(),
                last_sent: None,
            }),
        })
    }

    pub fn attach(
        transport: &Arc<TransportManager>,
        agent: ActiveAgent,
        surface: Box<dyn TerminalSurface>,
    ) -> (Arc<Self>, Subscription) {
        let sink: Arc<dyn FrameSink> = transport.clone();
        let channel = Self::new(sink, agent, surface);
        let weak = Arc::downgrade(&channel);
        let subscription = subscribe_family(transport, SubProtocol::Terminal, move |event| {
            if let Some(channel) = weak.upgrade() {
                channel.on_event(event);
            }
        });
        (channel, subscription)
    }

    pub fn on_event(&self, event: &TransportEvent) {
        let mut state = self.state.lock();
        match event {
            TransportEvent::Open => {
                state.last_sent = None;
                self.sync_size(&mut state);
            }
            TransportEvent::Frame(envelope) => {
                if let Entity::Terminal(TerminalFrame {
                    output: Some(output),
                    ..
                }) = &envelope.entity
                {
                    state.surface.write(output);
                }
            }
            TransportEvent::Error(_) => state.surface.write(&banner(ERROR_BANNER)),
            TransportEvent::Close => state.surface.write(&banner(CLOSED_BANNER)),
        }
    }

    /// Show or hide the terminal view. Becoming visible with a known size
    /// announces it.
    pub fn set_visible(&self, visible: bool) {
        let mut state = self.state.lock();
        state.visible = visible;
        self.sync_size(&mut state);
    }

    /// The view was measured (initially or after a resize).
    pub fn resized(&self, size: TerminalSize) {
        let mut state = self.state.lock();
        state.measured = size;
        self.sync_size(&mut state);
    }

    /// Forward keystrokes to the remote shell.
    pub fn send_input(&self, data: &str) -> bool {
        let frame = self.agent.composer().compose_terminal_input(data);
        self.sink.send_frame(&frame)
    }

    /// Write local status text straight to the surface.
    pub fn write_status(&self, text: &str) {
        self.state.lock().surface.write(text);
    }

    fn sync_size(&self, state: &mut TerminalState) -> bool {
        let size = state.measured;
        if !state.visible
            || size.is_zero()
            || state.last_sent == Some(size)
            || !self.sink.is_connected()
        {
            return false;
        }
        let frame = self.agent.composer().compose_terminal_resize(size);
        if !self.sink.send_frame(&frame) {
            return false;
        }
        debug!(cols = size.cols, rows = size.rows, "terminal size announced");
        state.last_sent = Some(size);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::tests::RecordingSink;
    use agent_stream::{Envelope, OutboundEntity};
    use std::sync::atomic::Ordering;

    #[derive(Clone, Default)]
    struct Screen(Arc<Mutex<String>>);

    impl TerminalSurface for Screen {
        fn write(&mut self, data: &str) {
            self.0.lock().push_str(data);
        }
    }

    fn channel(sink: Arc<RecordingSink>) -> (Arc<TerminalChannel>, Screen) {
        let screen = Screen::default();
        let ch = TerminalChannel::new(
            sink,
            ActiveAgent::new("terminal-agent"),
            Box::new(screen.clone()),
        );
        (ch, screen)
    }

    fn resizes(sink: &RecordingSink) -> Vec<(u16, u16)> {
        sink.sent()
            .into_iter()
            .filter_map(|f| match f.entity {
                OutboundEntity::Terminal(TerminalFrame {
                    columns: Some(c),
                    rows: Some(r),
                    ..
                }) => Some((c, r)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_resize_sent_once_when_visible_and_measured() {
        let sink = RecordingSink::connected();
        let (ch, _) = channel(sink.clone());

        ch.resized(TerminalSize::new(80, 24));
        assert!(resizes(&sink).is_empty(), "hidden view must not announce");

        ch.set_visible(true);
        ch.set_visible(true);
        ch.resized(TerminalSize::new(80, 24));
        assert_eq!(resizes(&sink), vec![(80, 24)]);

        ch.resized(TerminalSize::new(120, 40));
        ch.resized(TerminalSize::new(120, 40));
        assert_eq!(resizes(&sink), vec![(80, 24), (120, 40)]);
    }

    #[test]
    fn test_zero_size_is_not_announced() {
        let sink = RecordingSink::connected();
        let (ch, _) = channel(sink.clone());
        ch.set_visible(true);
        ch.resized(TerminalSize::new(0, 24));
        assert!(resizes(&sink).is_empty());
    }

    #[test]
    fn test_nothing_sent_while_disconnected_then_sent_on_open() {
        let sink = Arc::new(RecordingSink::default());
        let (ch, _) = channel(sink.clone());
        ch.set_visible(true);
        ch.resized(TerminalSize::new(100, 30));
        assert!(sink.sent().is_empty());

        sink.connected.store(true, Ordering::SeqCst);
        ch.on_event(&TransportEvent::Open);
        assert_eq!(resizes(&sink), vec![(100, 30)]);
    }

    #[test]
    fn test_reconnect_resends_same_size() {
        let sink = RecordingSink::connected();
        let (ch, _) = channel(sink.clone());
        ch.set_visible(true);
        ch.resized(TerminalSize::new(80, 24));
        ch.on_event(&TransportEvent::Close);
        ch.on_event(&TransportEvent::Open);
        assert_eq!(resizes(&sink), vec![(80, 24), (80, 24)]);
    }

    #[test]
    fn test_output_written_verbatim() {
        let (ch, screen) = channel(RecordingSink::connected());
        let out = TransportEvent::Frame(Envelope::new(
            Some("t"),
            Entity::Terminal(TerminalFrame::output("\x1b[1mbold\x1b[0m\r\n")),
        ));
        ch.on_event(&out);
        // Resize echoes carry no output.
        ch.on_event(&TransportEvent::Frame(Envelope::new(
            Some("t"),
            Entity::Terminal(TerminalFrame::resize(80, 24)),
        )));
        assert_eq!(*screen.0.lock(), "\x1b[1mbold\x1b[0m\r\n");
    }

    #[test]
    fn test_chat_frames_are_ignored() {
        let (ch, screen) = channel(RecordingSink::connected());
        ch.on_event(&TransportEvent::Frame(Envelope::new(
            Some("s"),
            Entity::text("hello", true),
        )));
        assert!(screen.0.lock().is_empty());
    }

    #[test]
    fn test_lifecycle_banners() {
        let (ch, screen) = channel(RecordingSink::connected());
        ch.on_event(&TransportEvent::Error("refused".into()));
        ch.on_event(&TransportEvent::Close);
        assert_eq!(
            *screen.0.lock(),
            format!("{}{}", banner(ERROR_BANNER), banner(CLOSED_BANNER))
        );
        assert_eq!(
            banner(CLOSED_BANNER),
            "\r\n\x1b[31mTerminal connection closed\x1b[0m\r\n"
        );
    }

    #[test]
    fn test_input_is_tagged_with_agent() {
        let sink = RecordingSink::connected();
        let (ch, _) = channel(sink.clone());
        assert!(ch.send_input("ls\r"));
        let sent = sink.sent();
        assert_eq!(
            sent[0].entity,
            OutboundEntity::Terminal(TerminalFrame::output("ls\r"))
        );
        assert_eq!(sent[0].metadata.as_ref().unwrap().agent, "terminal-agent");
    }
}
