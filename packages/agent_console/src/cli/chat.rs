use anyhow::Result;
use std::io::IsTerminal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::agent::{ActiveAgent, AgentCatalog};
use crate::chat::{ChatSession, LinkStatus};
use crate::config::FileConfig;
use crate::printer::TranscriptPrinter;
use crate::reconnect::{ReconnectPolicy, Reconnector};
use crate::transport::TransportManager;

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Text(&'a str),
    Choose(usize),
    Agent(&'a str),
    Invalid(&'static str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Input::Text(trimmed);
    };
    let (command, arg) = match rest.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (rest, ""),
    };
    match command {
        "quit" | "exit" => Input::Quit,
        "choose" => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => Input::Choose(n),
            _ => Input::Invalid("usage: /choose N"),
        },
        "agent" if !arg.is_empty() => Input::Agent(arg),
        "agent" => Input::Invalid("usage: /agent ID"),
        // Anything else that merely starts with a slash is ordinary text.
        _ => Input::Text(trimmed),
    }
}

fn describe(status: LinkStatus) -> &'static str {
    match status {
        LinkStatus::Connecting => "connecting...",
        LinkStatus::Connected => "connected",
        LinkStatus::Disconnected => "disconnected",
    }
}

/// Line-oriented chat on stdin/stdout until EOF or `/quit`.
pub async fn run(fc: &FileConfig, agent: Option<String>) -> Result<()> {
    let endpoint = fc.server.endpoint()?;
    let transport = TransportManager::new(endpoint);
    let agent = ActiveAgent::new(agent.unwrap_or_else(|| fc.agent.default.clone()));
    let catalog = AgentCatalog::from_file(&fc.agent);

    let (session, _subscription) = ChatSession::attach(&transport, agent, catalog);
    let _reconnector = fc
        .reconnect
        .enabled
        .then(|| Reconnector::install(&transport, ReconnectPolicy::from_file(&fc.reconnect)));
    transport.connect();

    let stdout = std::io::stdout();
    let color = stdout.is_terminal();
    let mut printer = TranscriptPrinter::new(stdout, color);
    let mut changes = session.changes();
    let mut status = session.status();
    eprintln!("[agentc: {}]", describe(status));
    printer.render(&session.view())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = session.view();
                if view.status != status {
                    status = view.status;
                    eprintln!("\n[agentc: {}]", describe(status));
                }
                printer.render(&view)?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Text(text) => {
                        if !session.submit_text(text) {
                            eprintln!("[agentc: not connected, message not sent]");
                        }
                    }
                    Input::Choose(n) => {
                        let Some(question) = session.pending_question() else {
                            eprintln!("[agentc: no question is waiting for an answer]");
                            continue;
                        };
                        let Some(choice) = question.choices.get(n - 1) else {
                            eprintln!("[agentc: choose 1-{}]", question.choices.len());
                            continue;
                        };
                        match session.submit_choice(choice) {
                            Ok(true) => {}
                            Ok(false) => eprintln!("[agentc: not connected, answer not sent]"),
                            Err(e) => eprintln!("[agentc: {e}]"),
                        }
                    }
                    Input::Agent(id) => session.switch_agent(id),
                    Input::Invalid(usage) => eprintln!("[agentc: {usage}]"),
                }
            }
        }
    }

    debug!(stats = ?transport.stats(), "chat session ending");
    transport.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text() {
        assert_eq!(parse_input("  hello there \n"), Input::Text("hello there"));
        assert_eq!(parse_input("/etc/hosts?"), Input::Text("/etc/hosts?"));
        assert_eq!(parse_input("   "), Input::Empty);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/exit"), Input::Quit);
        assert_eq!(parse_input("/choose 2"), Input::Choose(2));
        assert_eq!(parse_input("/agent  basic-chat "), Input::Agent("basic-chat"));
    }

    #[test]
    fn test_parse_invalid_commands() {
        assert_eq!(parse_input("/choose"), Input::Invalid("usage: /choose N"));
        assert_eq!(parse_input("/choose 0"), Input::Invalid("usage: /choose N"));
        assert_eq!(parse_input("/choose x"), Input::Invalid("usage: /choose N"));
        assert_eq!(parse_input("/agent"), Input::Invalid("usage: /agent ID"));
    }
}
