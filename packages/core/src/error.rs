// Типы ошибок

use std::fmt;
use thiserror::Error;

/// Все ошибки протокольного ядра.
///
/// Криптографические ошибки и ошибки фрейминга никогда не исправляются
/// автоматически: они прерывают текущий `execute` и передаются вызывающему как есть.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FgoError {
    #[error("Key format error: {0}")]
    KeyFormat(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Frame error: declared length {declared} exceeds {available} available bytes")]
    Frame { declared: usize, available: usize },

    #[error("Replay detected: counter {counter}")]
    Replay { counter: u64 },

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server protocol error: {0}")]
    ServerProtocol(String),

    #[error("Server rejected request (resCode {code}): {detail}")]
    ServerRejected { code: String, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FgoError {
    /// Повтор допустим только для сетевых ошибок
    pub fn is_retryable(&self) -> bool {
        matches!(self, FgoError::Transport(_))
    }

    pub fn is_crypto(&self) -> bool {
        matches!(
            self,
            FgoError::KeyFormat(_)
                | FgoError::Signing(_)
                | FgoError::Encryption(_)
                | FgoError::Decryption(_)
                | FgoError::Frame { .. }
                | FgoError::Replay { .. }
        )
    }
}

impl From<rmp_serde::encode::Error> for FgoError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        FgoError::Serialization(format!("MessagePack pack error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for FgoError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        FgoError::Serialization(format!("MessagePack unpack error: {}", err))
    }
}

impl From<reqwest::Error> for FgoError {
    fn from(err: reqwest::Error) -> Self {
        FgoError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FgoError>;

/// Шаг конвейера, на котором произошла ошибка
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Session,
    Encode,
    Encrypt,
    Sign,
    Transmit,
    Verify,
    Decrypt,
    Decode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Session => "session",
            Stage::Encode => "encode",
            Stage::Encrypt => "encrypt",
            Stage::Sign => "sign",
            Stage::Transmit => "transmit",
            Stage::Verify => "verify",
            Stage::Decrypt => "decrypt",
            Stage::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// Ошибка `RequestPipeline::execute`: исходный вид ошибки и шаг, на котором она произошла
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} step failed: {source}")]
pub struct ExecuteError {
    pub stage: Stage,
    #[source]
    pub source: FgoError,
}

impl ExecuteError {
    pub fn new(stage: Stage, source: FgoError) -> Self {
        Self { stage, source }
    }

    pub fn kind(&self) -> &FgoError {
        &self.source
    }

    pub fn into_kind(self) -> FgoError {
        self.source
    }
}

/// Для `map_err`: `.map_err(at(Stage::Sign))`
pub(crate) fn at(stage: Stage) -> impl FnOnce(FgoError) -> ExecuteError {
    move |source| ExecuteError { stage, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(FgoError::Transport("reset".into()).is_retryable());
        assert!(!FgoError::SessionExpired("x".into()).is_retryable());
        assert!(!FgoError::Replay { counter: 3 }.is_retryable());
    }

    #[test]
    fn test_execute_error_keeps_stage_and_kind() {
        let err = at(Stage::Decrypt)(FgoError::Frame {
            declared: 40,
            available: 16,
        });
        assert_eq!(err.stage, Stage::Decrypt);
        assert!(err.kind().is_crypto());
        assert!(err.to_string().starts_with("decrypt step failed"));
    }
}
