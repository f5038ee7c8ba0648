pub mod chat;
#[cfg(unix)]
pub mod terminal;
#[cfg(unix)]
mod tty;
