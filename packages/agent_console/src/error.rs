use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("agent service is unavailable")]
    Unavailable,

    #[error("connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("failed to serialize outbound frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChoiceError {
    #[error("no question is waiting for an answer")]
    NoPendingQuestion,

    #[error("{0:?} is not one of the offered choices")]
    UnknownChoice(String),
}

impl TransportError {
    /// Refused and reset connections mean nothing is listening; everything
    /// else is reported with its cause.
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Connect(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_is_unavailable() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = TransportError::from_tungstenite(tungstenite::Error::Io(io));
        assert!(matches!(err, TransportError::Unavailable));
    }

    #[test]
    fn test_other_io_is_connect() {
        let io = std::io::Error::from(std::io::ErrorKind::TimedOut);
        let err = TransportError::from_tungstenite(tungstenite::Error::Io(io));
        assert!(matches!(err, TransportError::Connect(_)));
        assert!(err.to_string().starts_with("connection failed"));
    }
}
