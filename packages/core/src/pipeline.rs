// RequestPipeline: session check -> encode -> encrypt -> sign -> transmit -> verify -> decrypt -> decode

use crate::config::Config;
use crate::dispatch::{Dispatcher, Reply, Stamp};
use crate::error::{ExecuteError, FgoError, Stage};
use crate::protocol::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::session::{Session, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Повторы при сетевых ошибках с exponential backoff
#[derive(Debug, Clone)]
struct RetryState {
    attempts: u32,
    max_attempts: u32,
}

impl RetryState {
    /// Повторы разрешены только для идемпотентных запросов
    fn new(idempotent: bool) -> Self {
        let max_attempts = if idempotent {
            Config::global().max_transport_retries
        } else {
            0
        };
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    fn next_delay(&mut self) -> Duration {
        let delay = Config::global().retry_backoff_ms(self.attempts);
        self.attempts += 1;
        Duration::from_millis(delay)
    }
}

pub struct RequestPipeline {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
}

impl RequestPipeline {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, sessions: Arc<SessionManager>) -> Self {
        Self {
            dispatcher,
            sessions,
        }
    }

    /// Выполнить запрос от имени текущей сессии
    ///
    /// Игровая ошибка (`resCode` не "00" и не ошибка аутентификации) не считается
    /// ошибкой конвейера: она приходит в `ResponseEnvelope::server_error`.
    pub async fn execute(&self, envelope: RequestEnvelope) -> Result<ResponseEnvelope, ExecuteError> {
        let session = self
            .sessions
            .ensure_active()
            .await
            .map_err(|e| ExecuteError::new(Stage::Session, e))?;

        let mut retry = RetryState::new(envelope.is_idempotent());
        loop {
            match self.attempt(&envelope, &session).await {
                Ok(Reply::Accepted {
                    envelope: response,
                    refresh_hint,
                }) => {
                    self.sessions.report_success(&session, refresh_hint).await;
                    debug!(
                        target: "fgo::pipeline",
                        endpoint = envelope.endpoint(),
                        res_code = %response.res_code,
                        "request completed"
                    );
                    return Ok(response);
                }
                Ok(Reply::AuthRejected(failure)) => {
                    let err = self.sessions.report_auth_failure(&session, failure).await;
                    return Err(ExecuteError::new(Stage::Verify, err));
                }
                Err(err) if err.kind().is_retryable() && retry.can_retry() => {
                    let delay = retry.next_delay();
                    warn!(
                        target: "fgo::pipeline",
                        endpoint = envelope.endpoint(),
                        attempt = retry.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transport failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Одна попытка с новыми timestamp и nonce
    async fn attempt(&self, envelope: &RequestEnvelope, session: &Session) -> Result<Reply, ExecuteError> {
        ensure_live(session, Stage::Session)?;
        let stamp = Stamp::fresh();
        let response = self.dispatcher.send(envelope, Some(session), &stamp).await?;
        // Сессию могли отозвать, пока запрос был в полёте
        ensure_live(session, Stage::Verify)?;
        self.dispatcher.open(envelope, Some(session), &stamp, response)
    }
}

fn ensure_live(session: &Session, stage: Stage) -> Result<(), ExecuteError> {
    if session.is_revoked() {
        return Err(ExecuteError::new(
            stage,
            FgoError::SessionExpired("session was invalidated while the request was in flight".to_string()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_state_only_for_idempotent() {
        let mut retry = RetryState::new(true);
        assert!(retry.can_retry());
        assert_eq!(retry.next_delay(), Duration::from_millis(200));
        assert_eq!(retry.next_delay(), Duration::from_millis(400));
        assert!(!retry.can_retry());

        assert!(!RetryState::new(false).can_retry());
    }
}
