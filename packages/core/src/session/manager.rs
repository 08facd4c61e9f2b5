// SessionManager: состояние сессии и single-flight переходы
//
// Состояние под tokio RwLock, переходы (login/refresh) под отдельным Mutex.
// Каждый завершённый переход увеличивает счётчик `transitions`; ожидающий,
// который после захвата Mutex видит новый счётчик, берёт готовый результат
// вместо повторного логина.

use super::handshake::{login_params, refresh_params, KeyExchange, LoginGrant};
use super::{Session, SessionState};
use crate::config::{Config, RecoveryPolicy};
use crate::dispatch::{Dispatcher, Reply, Stamp};
use crate::error::{FgoError, Result};
use crate::protocol::envelope::RequestEnvelope;
use crate::protocol::validation::AuthFailure;
use crate::utils::time;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Login,
    Refresh,
}

struct Inner {
    state: SessionState,
    session: Option<Arc<Session>>,
    transitions: u64,
    last_failure: Option<FgoError>,
    signature_rejections: u32,
    refresh_requested: bool,
}

impl Inner {
    /// Итог чужого перехода для ожидающего
    fn outcome(&self) -> Result<Arc<Session>> {
        match (self.state, &self.session) {
            (SessionState::Active, Some(session)) => Ok(session.clone()),
            _ => Err(self
                .last_failure
                .clone()
                .unwrap_or_else(|| FgoError::NotAuthenticated("no active session".to_string()))),
        }
    }
}

/// Флаг "идёт login/refresh"; снимается и при отмене future перехода
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionManager {
    dispatcher: Arc<Dispatcher>,
    inner: RwLock<Inner>,
    transition: Mutex<()>,
    in_flight: AtomicBool,
}

impl SessionManager {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            inner: RwLock::new(Inner {
                state: SessionState::Unauthenticated,
                session: None,
                transitions: 0,
                last_failure: None,
                signature_rejections: 0,
                refresh_requested: false,
            }),
            transition: Mutex::new(()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Текущее состояние; `Authenticating`, пока идёт login/refresh
    pub async fn state(&self) -> SessionState {
        if self.in_flight.load(Ordering::SeqCst) {
            return SessionState::Authenticating;
        }
        self.inner.read().await.state
    }

    pub async fn current(&self) -> Option<Arc<Session>> {
        self.inner.read().await.session.clone()
    }

    /// Полный логин. Параллельные вызовы выполняют один логин и делят результат.
    pub async fn login(&self) -> Result<Arc<Session>> {
        let observed = self.inner.read().await.transitions;
        self.run_transition(observed, Transition::Login).await
    }

    /// Refresh с ротацией ключей; при отказе полный логин
    pub async fn refresh(&self) -> Result<Arc<Session>> {
        let observed = self.inner.read().await.transitions;
        self.run_transition(observed, Transition::Refresh).await
    }

    /// Сессия, пригодная для отправки запроса
    ///
    /// Ждёт идущий переход, при необходимости выполняет refresh, а при
    /// `RecoveryPolicy::Relogin` и повторный логин истёкшей сессии.
    pub async fn ensure_active(&self) -> Result<Arc<Session>> {
        if self.in_flight.load(Ordering::SeqCst) {
            drop(self.transition.lock().await);
        }

        let (state, session, refresh_requested, observed) = {
            let inner = self.inner.read().await;
            (
                inner.state,
                inner.session.clone(),
                inner.refresh_requested,
                inner.transitions,
            )
        };

        match (state, session) {
            (SessionState::Active, Some(session)) => {
                let now = time::now();
                let margin = Config::global().session_refresh_margin_secs;
                if refresh_requested || session.needs_refresh(now, margin) {
                    debug!(
                        target: "fgo::session",
                        generation = session.generation(),
                        refresh_requested,
                        "session refresh due"
                    );
                    self.run_transition(observed, Transition::Refresh).await
                } else {
                    Ok(session)
                }
            }
            (SessionState::Expired, _) => match self.dispatcher.settings().recovery {
                RecoveryPolicy::Manual => Err(FgoError::SessionExpired(
                    "session expired, login required".to_string(),
                )),
                RecoveryPolicy::Relogin => self.run_transition(observed, Transition::Login).await,
            },
            (SessionState::Invalidated, _) => Err(FgoError::NotAuthenticated(
                "session was invalidated".to_string(),
            )),
            _ => Err(FgoError::NotAuthenticated("login required".to_string())),
        }
    }

    async fn run_transition(&self, observed: u64, kind: Transition) -> Result<Arc<Session>> {
        let _guard = self.transition.lock().await;

        let previous = {
            let inner = self.inner.read().await;
            if inner.transitions != observed {
                debug!(target: "fgo::session", ?kind, "reusing result of concurrent transition");
                return inner.outcome();
            }
            inner.session.clone()
        };
        let _in_flight = InFlight::start(&self.in_flight);

        let attempt = match (kind, &previous, &self.dispatcher.settings().refresh_endpoint) {
            (Transition::Refresh, Some(current), Some(endpoint)) => {
                match self.perform_refresh(current, endpoint).await {
                    Ok(grant) => Ok(grant),
                    Err(err) => {
                        warn!(target: "fgo::session", error = %err, "refresh failed, falling back to login");
                        self.perform_login().await
                    }
                }
            }
            _ => self.perform_login().await,
        };
        let result = attempt.and_then(|(grant, exchange)| {
            let cipher = grant.client_cipher(exchange)?;
            Ok((grant, cipher))
        });

        let mut inner = self.inner.write().await;
        inner.transitions += 1;
        let generation = inner.transitions;

        match result {
            Ok((grant, cipher)) => {
                let expires_at = grant.expires_at_or(time::now());
                let session = Arc::new(Session::new(grant.session_token, cipher, expires_at, generation));
                if let Some(old) = inner.session.replace(session.clone()) {
                    old.retire_keys();
                }
                inner.state = SessionState::Active;
                inner.last_failure = None;
                inner.refresh_requested = false;
                info!(
                    target: "fgo::session",
                    ?kind,
                    generation,
                    expires_at = session.expires_at(),
                    "session established"
                );
                Ok(session)
            }
            Err(err) => {
                warn!(target: "fgo::session", ?kind, error = %err, "session transition failed");
                let still_active = inner.state == SessionState::Active;
                match previous {
                    // Refresh в пределах margin: старая сессия ещё действительна
                    Some(current) if kind == Transition::Refresh && still_active && !current.is_expired(time::now()) => {
                        inner.last_failure = None;
                        Ok(current)
                    }
                    Some(current) if kind == Transition::Refresh && still_active => {
                        current.revoke();
                        inner.state = SessionState::Expired;
                        let err = FgoError::SessionExpired(format!("session refresh failed: {}", err));
                        inner.last_failure = Some(err.clone());
                        Err(err)
                    }
                    _ => {
                        inner.last_failure = Some(err.clone());
                        Err(err)
                    }
                }
            }
        }
    }

    async fn perform_login(&self) -> Result<(LoginGrant, KeyExchange)> {
        let dispatcher = &self.dispatcher;
        let settings = dispatcher.settings();
        let exchange = KeyExchange::new();
        let stamp = Stamp::fresh();

        let params = login_params(
            dispatcher.credentials(),
            dispatcher.device(),
            &settings.game,
            dispatcher.signer(),
            &stamp,
            exchange.public_key(),
        )?;
        let envelope = RequestEnvelope::internal(settings.login_endpoint.clone(), params);

        info!(target: "fgo::session", user_id = dispatcher.credentials().user_id(), "logging in");
        let grant = self.exchange(&envelope, None, &stamp, "login").await?;
        Ok((grant, exchange))
    }

    async fn perform_refresh(&self, current: &Arc<Session>, endpoint: &str) -> Result<(LoginGrant, KeyExchange)> {
        let exchange = KeyExchange::new();
        let stamp = Stamp::fresh();
        let envelope = RequestEnvelope::internal(endpoint, refresh_params(exchange.public_key()));

        debug!(target: "fgo::session", generation = current.generation(), "refreshing session");
        let grant = self.exchange(&envelope, Some(current.as_ref()), &stamp, "refresh").await?;
        Ok((grant, exchange))
    }

    async fn exchange(
        &self,
        envelope: &RequestEnvelope,
        session: Option<&Session>,
        stamp: &Stamp,
        what: &str,
    ) -> Result<LoginGrant> {
        let reply = self
            .dispatcher
            .round_trip(envelope, session, stamp)
            .await
            .map_err(|e| e.into_kind())?;
        match reply {
            Reply::AuthRejected(failure) => Err(FgoError::NotAuthenticated(format!(
                "{} rejected: {}",
                what,
                failure.describe()
            ))),
            Reply::Accepted { envelope, .. } => LoginGrant::from_params(&envelope.into_result()?.params),
        }
    }

    /// Сервер отверг аутентификацию запроса, выполненного с `session`
    ///
    /// Возвращает ошибку, которую получит вызывающий `execute`.
    pub(crate) async fn report_auth_failure(&self, session: &Session, failure: AuthFailure) -> FgoError {
        let mut inner = self.inner.write().await;
        let current = inner
            .session
            .as_ref()
            .map(|s| s.generation() == session.generation())
            .unwrap_or(false);

        if current && inner.state == SessionState::Active {
            session.revoke();
            inner.state = SessionState::Expired;
            if failure == AuthFailure::SignatureRejected {
                inner.signature_rejections += 1;
                if inner.signature_rejections >= Config::global().max_signature_rejections {
                    inner.state = SessionState::Invalidated;
                    inner.session = None;
                    warn!(
                        target: "fgo::session",
                        rejections = inner.signature_rejections,
                        "signature repeatedly rejected, session invalidated"
                    );
                }
            } else {
                inner.signature_rejections = 0;
            }
            warn!(target: "fgo::session", generation = session.generation(), ?failure, "session expired by server");
        }
        FgoError::SessionExpired(failure.describe().to_string())
    }

    /// Запрос с `session` принят сервером
    pub(crate) async fn report_success(&self, session: &Session, refresh_hint: bool) {
        let needs_write = refresh_hint || self.inner.read().await.signature_rejections > 0;
        if !needs_write {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.signature_rejections = 0;
        let current = inner
            .session
            .as_ref()
            .map(|s| s.generation() == session.generation())
            .unwrap_or(false);
        if refresh_hint && current {
            debug!(target: "fgo::session", generation = session.generation(), "server requested refresh");
            inner.refresh_requested = true;
        }
    }

    /// Локальный выход: сессия отзывается, запросы в полёте завершаются SessionExpired
    pub async fn logout(&self) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.session.take() {
            session.revoke();
        }
        inner.state = SessionState::Invalidated;
        inner.transitions += 1;
        inner.refresh_requested = false;
        inner.last_failure = Some(FgoError::NotAuthenticated("logged out".to_string()));
        info!(target: "fgo::session", "logged out");
    }
}
