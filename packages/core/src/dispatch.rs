// Общий шаг "штамп, подпись, отправка, разбор ответа"
// Используется и конвейером запросов, и SessionManager для login/refresh.

use crate::config::ClientSettings;
use crate::crypto::auth_code::{compute_auth_code, AUTH_CODE_KEY};
use crate::crypto::{CipherEngine, Credentials, DeviceInfo, RequestSigner};
use crate::error::{at, ExecuteError, FgoError, Stage};
use crate::protocol::envelope::{Params, RequestEnvelope, ResponseEnvelope, Value};
use crate::protocol::transport::{header, Headers, Transport, WireRequest, WireResponse, CONTENT_TYPE_MSGPACK};
use crate::protocol::validation::{self, AuthFailure};
use crate::protocol::wire;
use crate::session::Session;
use crate::utils::{b64, time, uuid::generate_nonce};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Временная метка и nonce одной попытки отправки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stamp {
    pub(crate) nonce: Uuid,
    pub(crate) timestamp: i64,
}

impl Stamp {
    pub(crate) fn fresh() -> Self {
        Self {
            nonce: generate_nonce(),
            timestamp: time::now(),
        }
    }
}

/// Результат разбора ответа
#[derive(Debug)]
pub(crate) enum Reply {
    Accepted {
        envelope: ResponseEnvelope,
        refresh_hint: bool,
    },
    AuthRejected(AuthFailure),
}

pub(crate) struct Dispatcher {
    credentials: Credentials,
    device: Arc<DeviceInfo>,
    settings: Arc<ClientSettings>,
    signer: Arc<dyn RequestSigner>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub(crate) fn new(
        credentials: Credentials,
        device: Arc<DeviceInfo>,
        settings: Arc<ClientSettings>,
        signer: Arc<dyn RequestSigner>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            credentials,
            device,
            settings,
            signer,
            transport,
        }
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub(crate) fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub(crate) fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub(crate) fn signer(&self) -> &dyn RequestSigner {
        self.signer.as_ref()
    }

    /// Базовые поля формы, которые сервер ждёт в каждом запросе
    fn base_params(&self, stamp: &Stamp) -> Params {
        let game = &self.settings.game;
        let mut params = Params::new();
        params.insert("userId".into(), Value::Int(self.credentials.user_id() as i64));
        params.insert("authKey".into(), Value::from(self.credentials.auth_key()));
        params.insert("appVer".into(), Value::from(game.app_ver.as_str()));
        params.insert("dateVer".into(), Value::Int(game.date_ver));
        params.insert("verCode".into(), Value::from(game.ver_code.as_str()));
        params.insert("dataVer".into(), Value::Int(game.data_ver));
        params.insert("lastAccessTime".into(), Value::Int(stamp.timestamp));
        params.insert("idempotencyKey".into(), Value::Str(stamp.nonce.to_string()));
        params
    }

    /// Собрать тело: базовые поля, параметры вызывающего, authCode
    pub(crate) fn encode(&self, envelope: &RequestEnvelope, stamp: &Stamp) -> crate::error::Result<Vec<u8>> {
        let mut params = self.base_params(stamp);
        for (key, value) in envelope.params() {
            params.insert(key.clone(), value.clone());
        }
        let auth_code = compute_auth_code(&params, self.credentials.auth_secret())?;
        params.insert(AUTH_CODE_KEY.into(), Value::Str(auth_code));
        wire::encode_body(&params, envelope.payload())
    }

    fn headers(&self, stamp: &Stamp, signature: &[u8], session: Option<&Session>, protected: bool) -> Headers {
        let mut headers = Headers::new();
        headers.insert(header::SIGNATURE.into(), b64::encode(signature));
        headers.insert(header::TIMESTAMP.into(), stamp.timestamp.to_string());
        headers.insert(header::NONCE.into(), stamp.nonce.to_string());
        headers.insert(header::DEVICE_INFO.into(), self.device.fingerprint().to_string());
        headers.insert(header::USER_ID.into(), self.credentials.user_id().to_string());
        headers.insert(header::UNITY_VERSION.into(), self.settings.x_unity_version.clone());
        headers.insert(header::USER_AGENT.into(), self.device.user_agent().to_string());
        headers.insert(header::CONTENT_TYPE.into(), CONTENT_TYPE_MSGPACK.to_string());
        if let Some(session) = session {
            headers.insert(header::SESSION_TOKEN.into(), session.token().to_string());
        }
        if protected {
            headers.insert(header::PROTECTED.into(), "1".to_string());
        }
        headers
    }

    /// Encode -> Encrypt -> Sign -> Transmit
    pub(crate) async fn send(
        &self,
        envelope: &RequestEnvelope,
        session: Option<&Session>,
        stamp: &Stamp,
    ) -> Result<WireResponse, ExecuteError> {
        let mut body = self.encode(envelope, stamp).map_err(at(Stage::Encode))?;

        if envelope.is_protected() {
            let session = session.ok_or_else(|| {
                ExecuteError::new(
                    Stage::Encrypt,
                    FgoError::NotAuthenticated("protected request needs a session".to_string()),
                )
            })?;
            body = session.cipher().encrypt(&body).map_err(at(Stage::Encrypt))?;
        }

        let signature = self
            .signer
            .sign_request(&body, stamp.timestamp, &stamp.nonce)
            .map_err(at(Stage::Sign))?;

        let path = envelope.endpoint().to_string();
        let request = WireRequest {
            url: format!(
                "{}{}?_userId={}",
                self.settings.host.trim_end_matches('/'),
                path,
                self.credentials.user_id()
            ),
            headers: self.headers(stamp, &signature, session, envelope.is_protected()),
            path,
            body,
        };

        debug!(
            target: "fgo::pipeline",
            endpoint = %request.path,
            protected = envelope.is_protected(),
            bytes = request.body.len(),
            "request dispatched"
        );
        self.transport.send(request).await.map_err(at(Stage::Transmit))
    }

    /// Verify -> Decrypt -> Decode
    pub(crate) fn open(
        &self,
        envelope: &RequestEnvelope,
        session: Option<&Session>,
        stamp: &Stamp,
        response: WireResponse,
    ) -> Result<Reply, ExecuteError> {
        if let Some(failure) = validation::check_http_status(response.status).map_err(at(Stage::Verify))? {
            return Ok(Reply::AuthRejected(failure));
        }
        validation::check_protection(envelope.is_protected(), &response).map_err(at(Stage::Verify))?;
        validation::verify_nonce_echo(&stamp.nonce, &response).map_err(at(Stage::Verify))?;

        let refresh_hint = response.refresh_requested();
        let protected = response.is_protected();
        let status = response.status;
        let body = if protected {
            let session = session.ok_or_else(|| {
                ExecuteError::new(
                    Stage::Decrypt,
                    FgoError::ServerProtocol("encrypted response without a session".to_string()),
                )
            })?;
            session.cipher().decrypt(&response.body).map_err(at(Stage::Decrypt))?
        } else {
            response.body
        };

        let decoded = wire::decode_response(status, &body).map_err(at(Stage::Decode))?;
        if let Some(failure) = validation::classify_res_code(&decoded.res_code) {
            return Ok(Reply::AuthRejected(failure));
        }
        if !protected {
            validation::check_plain_answer(envelope.is_protected(), &decoded.res_code)
                .map_err(at(Stage::Verify))?;
        }

        Ok(Reply::Accepted {
            envelope: decoded,
            refresh_hint,
        })
    }

    /// Одна попытка целиком
    pub(crate) async fn round_trip(
        &self,
        envelope: &RequestEnvelope,
        session: Option<&Session>,
        stamp: &Stamp,
    ) -> Result<Reply, ExecuteError> {
        let response = self.send(envelope, session, stamp).await?;
        self.open(envelope, session, stamp, response)
    }
}
