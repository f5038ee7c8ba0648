use anyhow::Result;
use std::io::Write;
use tokio::sync::mpsc;

use crate::agent::ActiveAgent;
use crate::cli::tty::{Keyboard, RawTerminal};
use crate::config::FileConfig;
use crate::reconnect::{ReconnectPolicy, Reconnector};
use crate::terminal::{CONNECTING_STATUS, TerminalChannel, TerminalSurface};
use crate::transport::{TransportEvent, TransportManager};

/// What happened when a terminal session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// User pressed Ctrl-] to detach.
    Detached,
    /// The connection closed and reconnection is off.
    Closed,
    /// Local stdin reached EOF.
    InputClosed,
}

impl AttachOutcome {
    fn describe(self) -> &'static str {
        match self {
            AttachOutcome::Detached => "detached",
            AttachOutcome::Closed => "connection closed",
            AttachOutcome::InputClosed => "input closed",
        }
    }
}

struct StdoutSurface;

impl TerminalSurface for StdoutSurface {
    fn write(&mut self, data: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(data.as_bytes());
        let _ = stdout.flush();
    }
}

/// Attach the local terminal to the agent's remote shell.
pub async fn run(fc: &FileConfig, agent: Option<String>) -> Result<AttachOutcome> {
    let endpoint = fc.server.endpoint()?;
    let transport = TransportManager::new(endpoint);
    let agent = ActiveAgent::new(agent.unwrap_or_else(|| fc.agent.default.clone()));

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
    let _lifecycle = transport.subscribe(move |event| {
        if matches!(event, TransportEvent::Close) {
            let _ = closed_tx.send(());
        }
    });
    let (channel, _subscription) =
        TerminalChannel::attach(&transport, agent, Box::new(StdoutSurface));
    let reconnect = fc.reconnect.enabled;
    let _reconnector = reconnect
        .then(|| Reconnector::install(&transport, ReconnectPolicy::from_file(&fc.reconnect)));

    channel.write_status(&format!("{CONNECTING_STATUS}\r\n"));

    let raw = RawTerminal::enter();
    if let Some(size) = raw.size() {
        channel.resized(size);
    }
    channel.set_visible(true);
    transport.connect();

    let mut resizes = raw.resizes()?;
    let mut keyboard = Keyboard::spawn();

    let outcome = loop {
        tokio::select! {
            keys = keyboard.next() => {
                let Some(keys) = keys else {
                    break AttachOutcome::InputClosed;
                };
                if !keys.text.is_empty() {
                    channel.send_input(&keys.text);
                }
                if keys.detach {
                    break AttachOutcome::Detached;
                }
            }

            Some(()) = closed_rx.recv() => {
                if !reconnect {
                    break AttachOutcome::Closed;
                }
            }

            Some(size) = resizes.next() => channel.resized(size),
        }
    };

    drop(keyboard);
    transport.close();
    drop(raw);
    eprintln!("\r\n[agentc: {}]", outcome.describe());
    Ok(outcome)
}
