use crate::codec::DecodeError;
use thiserror::Error;
use tx_history::TxAction;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Error raised by the client engine.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("account data could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ClientError>,
    },
    /// The remote program is not deployed or not executable on the target cluster.
    #[error("program unreachable: {0}")]
    ProgramUnreachable(String),
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Network level failure. The only variant retried by default.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by program{}: {message}", code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Rejected { code: Option<u32>, message: String },
    #[error("{running} is still in flight")]
    Busy { running: TxAction },
    #[error("transaction {signature} was not confirmed")]
    Unconfirmed { signature: String },
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionViolation {
    #[error("player account is not initialized")]
    NotInitialized,
    #[error("no encounter pending; explore first")]
    NoPendingEncounter,
    #[error("no reward to claim")]
    NothingToClaim,
    #[error("player is dead")]
    PlayerDead,
    #[error("invalid stats hp={hp} atk={atk} def={def}: hp 1-100, atk 1-50, def 0-20")]
    InvalidStats { hp: u8, atk: u8, def: u8 },
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    pub fn is_program_unreachable(&self) -> bool {
        match self {
            ClientError::ProgramUnreachable(_) => true,
            ClientError::RetryExhausted { last, .. } => last.is_program_unreachable(),
            _ => false,
        }
    }

    /// Classify an unstructured error message. Only used when the remote gives no
    /// machine-readable error payload.
    pub fn classify_message(message: &str) -> ClientError {
        let lower = message.to_lowercase();
        if lower.contains("program that does not exist")
            || lower.contains("simulation failed")
        {
            ClientError::ProgramUnreachable(message.to_owned())
        } else if lower.contains("unauthorized") || lower.contains("constraintseeds") {
            ClientError::Unauthorized(message.to_owned())
        } else if ["timeout", "timed out", "connection", "network", "429", "502", "503", "504"]
            .iter()
            .any(|pattern| lower.contains(pattern))
        {
            ClientError::Transport(message.to_owned())
        } else {
            ClientError::Rejected {
                code: None,
                message: message.to_owned(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn classify_message__missing_program__is_unreachable() {
        let err = ClientError::classify_message(
            "Attempt to load a program that does not exist",
        );

        assert!(err.is_program_unreachable());
    }

    #[test]
    fn classify_message__failed_simulation__is_unreachable() {
        let err = ClientError::classify_message("Transaction simulation failed: Blockhash not found");

        assert!(matches!(err, ClientError::ProgramUnreachable(_)));
    }

    #[test]
    fn classify_message__connection_reset__is_transient() {
        let err = ClientError::classify_message("connection reset by peer");

        assert!(err.is_transient());
    }

    #[test]
    fn classify_message__unknown_text__is_rejection() {
        let err = ClientError::classify_message("custom program error: 0x1770");

        assert!(matches!(err, ClientError::Rejected { code: None, .. }));
    }

    #[test]
    fn is_program_unreachable__wrapped_in_retry_exhausted__is_detected() {
        let err = ClientError::RetryExhausted {
            attempts: 3,
            last: Box::new(ClientError::ProgramUnreachable("gone".into())),
        };

        assert!(err.is_program_unreachable());
        assert!(!err.is_transient());
    }
}
