// FgoClient: один аутентифицированный аккаунт
//
// Владеет учётными данными, SessionManager и конвейером. Сервисные обёртки
// (магазин, гача, подарки) строятся поверх `execute`/`call`.

use crate::config::ClientSettings;
use crate::crypto::{Credentials, DeviceInfo, RequestSigner, RsaSigner};
use crate::dispatch::Dispatcher;
use crate::error::{ExecuteError, Result, Stage};
use crate::pipeline::RequestPipeline;
use crate::protocol::envelope::{RequestBuilder, RequestEnvelope, ResponseEnvelope};
use crate::protocol::transport::{HttpTransport, Transport};
use crate::session::{Session, SessionManager, SessionState};
use std::sync::Arc;

pub struct FgoClient {
    settings: Arc<ClientSettings>,
    sessions: Arc<SessionManager>,
    pipeline: RequestPipeline,
}

impl FgoClient {
    /// Клиент с HTTP транспортом по умолчанию
    pub fn new(credentials: Credentials, device: Arc<DeviceInfo>, settings: ClientSettings) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_transport(credentials, device, settings, transport)
    }

    pub fn with_transport(
        credentials: Credentials,
        device: Arc<DeviceInfo>,
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let signer = Arc::new(RsaSigner::from_pkcs8_pem(credentials.private_key_pem())?);
        Self::with_signer(credentials, device, settings, signer, transport)
    }

    /// Полная сборка: свой signer (например, для конформанс-тестов)
    pub fn with_signer(
        credentials: Credentials,
        device: Arc<DeviceInfo>,
        settings: ClientSettings,
        signer: Arc<dyn RequestSigner>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let dispatcher = Arc::new(Dispatcher::new(
            credentials,
            device,
            settings.clone(),
            signer,
            transport,
        ));
        let sessions = Arc::new(SessionManager::new(dispatcher.clone()));
        let pipeline = RequestPipeline::new(dispatcher, sessions.clone());

        Ok(Self {
            settings,
            sessions,
            pipeline,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn login(&self) -> Result<Arc<Session>> {
        self.sessions.login().await
    }

    pub async fn logout(&self) {
        self.sessions.logout().await
    }

    pub async fn session_state(&self) -> SessionState {
        self.sessions.state().await
    }

    /// Начать сборку запроса
    pub fn request(&self, endpoint: impl Into<String>) -> RequestBuilder {
        RequestEnvelope::builder(endpoint)
    }

    pub async fn execute(&self, envelope: RequestEnvelope) -> std::result::Result<ResponseEnvelope, ExecuteError> {
        self.pipeline.execute(envelope).await
    }

    /// Собрать запрос по настройкам клиента и выполнить
    pub async fn call(&self, builder: RequestBuilder) -> std::result::Result<ResponseEnvelope, ExecuteError> {
        let envelope = builder
            .build(&self.settings)
            .map_err(|e| ExecuteError::new(Stage::Encode, e))?;
        self.execute(envelope).await
    }
}
