//! Local terminal plumbing for `agentc terminal`: raw mode, window size and
//! keyboard input.

use agent_stream::TerminalSize;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{self, SetArg, Termios};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;

/// Ctrl-]
const DETACH_BYTE: u8 = 0x1D;

nix::ioctl_read_bad!(tiocgwinsz, nix::libc::TIOCGWINSZ, nix::libc::winsize);

/// Stdin in raw mode for as long as this value lives. Inert when stdin is
/// not a terminal.
pub struct RawTerminal {
    saved: Option<Termios>,
}

impl RawTerminal {
    pub fn enter() -> Self {
        let stdin = io::stdin();
        let saved = termios::tcgetattr(&stdin).ok();
        if let Some(saved) = &saved {
            let mut raw = saved.clone();
            termios::cfmakeraw(&mut raw);
            let _ = termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw);
        }
        Self { saved }
    }

    /// Current window size, if stdout is a terminal with a usable size.
    pub fn size(&self) -> Option<TerminalSize> {
        window_size()
    }

    /// Window sizes as they change.
    pub fn resizes(&self) -> io::Result<Resizes> {
        Ok(Resizes {
            sigwinch: signal(SignalKind::window_change())?,
        })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Some(saved) = &self.saved {
            let _ = termios::tcsetattr(&io::stdin(), SetArg::TCSANOW, saved);
        }
        let _ = io::stdout().flush();
    }
}

fn window_size() -> Option<TerminalSize> {
    let mut ws = nix::libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe { tiocgwinsz(io::stdout().as_raw_fd(), &mut ws) }.ok()?;
    let size = TerminalSize::new(ws.ws_col, ws.ws_row);
    (!size.is_zero()).then_some(size)
}

/// One window size per SIGWINCH.
pub struct Resizes {
    sigwinch: Signal,
}

impl Resizes {
    pub async fn next(&mut self) -> Option<TerminalSize> {
        loop {
            self.sigwinch.recv().await?;
            if let Some(size) = window_size() {
                return Some(size);
            }
        }
    }
}

/// One batch of keystrokes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Keys {
    pub text: String,
    /// The detach key was pressed; `text` holds what came before it.
    pub detach: bool,
}

/// Turns raw stdin chunks into text. A multi-byte character split across
/// two reads is held back until its remaining bytes arrive.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    pending: Vec<u8>,
}

impl KeyDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Keys {
        let (chunk, detach) = match chunk.iter().position(|&b| b == DETACH_BYTE) {
            Some(pos) => (&chunk[..pos], true),
            None => (chunk, false),
        };
        self.pending.extend_from_slice(chunk);

        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Truncated sequence at the end: wait for the rest.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        if detach {
            self.pending.clear();
        }
        Keys { text, detach }
    }
}

/// Stdin read on a blocking thread. The thread polls so it notices when the
/// keyboard is dropped.
pub struct Keyboard {
    rx: mpsc::Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    decoder: KeyDecoder,
}

impl Keyboard {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        std::thread::spawn(move || read_stdin(tx, thread_stop));
        Self {
            rx,
            stop,
            decoder: KeyDecoder::default(),
        }
    }

    /// Next batch of keystrokes; `None` once stdin is closed.
    pub async fn next(&mut self) -> Option<Keys> {
        let chunk = self.rx.recv().await?;
        Some(self.decoder.feed(&chunk))
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn read_stdin(tx: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut buf = [0u8; 4096];
    while !stop.load(Ordering::Relaxed) {
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(100u16)) {
            Ok(0) | Err(nix::errno::Errno::EINTR) => continue,
            Ok(_) => {}
            Err(_) => return,
        }
        let n = match stdin.lock().read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if tx.blocking_send(buf[..n].to_vec()).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut d = KeyDecoder::default();
        assert_eq!(
            d.feed(b"ls\r"),
            Keys {
                text: "ls\r".into(),
                detach: false
            }
        );
    }

    #[test]
    fn test_character_split_across_reads() {
        let bytes = "héllo ✓".as_bytes();
        // Split inside the two-byte 'é' and again inside the three-byte '✓'.
        let (a, rest) = bytes.split_at(2);
        let (b, c) = rest.split_at(rest.len() - 1);

        let mut d = KeyDecoder::default();
        let mut text = String::new();
        for chunk in [a, b, c] {
            let keys = d.feed(chunk);
            assert!(!keys.text.contains(char::REPLACEMENT_CHARACTER));
            text.push_str(&keys.text);
        }
        assert_eq!(text, "héllo ✓");
        assert_eq!(d.feed(b"").text, "");
    }

    #[test]
    fn test_invalid_bytes_are_replaced_not_held() {
        let mut d = KeyDecoder::default();
        assert_eq!(d.feed(b"a\xffb").text, "a\u{FFFD}b");
        assert_eq!(d.feed(b"c").text, "c");
    }

    #[test]
    fn test_detach_key() {
        let mut d = KeyDecoder::default();
        assert_eq!(
            d.feed(b"ab\x1dcd"),
            Keys {
                text: "ab".into(),
                detach: true
            }
        );
        assert_eq!(
            d.feed(b"\x1d"),
            Keys {
                text: String::new(),
                detach: true
            }
        );
    }
}
