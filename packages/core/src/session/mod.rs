//! Жизненный цикл сессии
//!
//! ```text
//!   Unauthenticated ──login──▶ Authenticating ──ok──▶ Active
//!          ▲                        │  ▲                 │ auth failure
//!          └────────fail────────────┘  └──login/refresh──┤
//!                                                        ▼
//!   Invalidated ◀──logout / N × signature rejected──── Expired
//! ```
//!
//! - [`handshake`]: X25519 обмен ключами при login/refresh
//! - [`manager`]: `SessionManager`, single-flight переходы

pub mod handshake;
pub mod manager;

pub use manager::SessionManager;

use crate::crypto::{CatMouseCipher, CipherEngine};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Active,
    Expired,
    Invalidated,
}

/// Установленная сессия: токен, ключи шифра и срок действия
///
/// Неизменяема после создания, кроме флага отзыва. Запросы держат
/// `Arc<Session>` и проверяют `is_revoked()` до и после отправки.
pub struct Session {
    token: String,
    cipher: Arc<CatMouseCipher>,
    expires_at: i64,
    generation: u64,
    revoked: AtomicBool,
}

impl Session {
    pub(crate) fn new(token: String, cipher: CatMouseCipher, expires_at: i64, generation: u64) -> Self {
        Self {
            token,
            cipher: Arc::new(cipher),
            expires_at,
            generation,
            revoked: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn cipher(&self) -> &Arc<CatMouseCipher> {
        &self.cipher
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Номер перехода, создавшего сессию
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn needs_refresh(&self, now: i64, margin_secs: i64) -> bool {
        now >= self.expires_at.saturating_sub(margin_secs)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Ключи заменены новой сессией; токен для plain запросов ещё валиден
    pub(crate) fn retire_keys(&self) {
        self.cipher.retire();
    }

    /// Сессия больше не принимается сервером
    pub(crate) fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
        self.cipher.retire();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("generation", &self.generation)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Role, SessionSecret};

    fn session(expires_at: i64) -> Session {
        let secret = SessionSecret::from_bytes([1; 32]);
        let cipher = CatMouseCipher::new(&secret, Role::Client, 1).unwrap();
        Session::new("token".into(), cipher, expires_at, 1)
    }

    #[test]
    fn test_refresh_window() {
        let s = session(1_000);
        assert!(!s.needs_refresh(900, 60));
        assert!(s.needs_refresh(940, 60));
        assert!(!s.is_expired(999));
        assert!(s.is_expired(1_000));
    }

    #[test]
    fn test_revoke_retires_cipher() {
        let s = session(1_000);
        s.retire_keys();
        assert!(s.cipher().is_retired());
        assert!(!s.is_revoked());
        s.revoke();
        assert!(s.is_revoked());
    }
}
