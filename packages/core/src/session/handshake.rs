// Обмен ключами при login/refresh
//
// Клиент отправляет эфемерный X25519 ключ (`clientKey`), сервер отвечает
// `serverKey`, `keySalt` и токеном сессии. Секрет сессии:
//   HKDF-SHA256(salt = keySalt, ikm = X25519(client, server), info = "fgo-session-secret")

use crate::config::{Config, GameVersion};
use crate::crypto::{hkdf_derive_key, CatMouseCipher, Credentials, DeviceInfo, RequestSigner, Role, SessionSecret};
use crate::dispatch::Stamp;
use crate::error::{FgoError, Result};
use crate::protocol::envelope::{Params, Value};
use crate::protocol::wire::{pack_raw, unpack_raw};
use crate::utils::b64;
use rand::rngs::OsRng;
use serde::Deserialize;
use x25519_dalek::{EphemeralSecret, PublicKey};

pub const SESSION_SECRET_INFO: &[u8] = b"fgo-session-secret";
pub const CLIENT_KEY: &str = "clientKey";

/// Вывести секрет сессии из общего X25519 секрета
pub fn derive_session_secret(shared_secret: &[u8], key_salt: &[u8]) -> Result<SessionSecret> {
    let okm = hkdf_derive_key(key_salt, shared_secret, SESSION_SECRET_INFO, SessionSecret::LEN)?;
    SessionSecret::from_slice(&okm)
}

/// Эфемерная половина обмена, живёт до получения ответа сервера
pub struct KeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl KeyExchange {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Завершить обмен ответом сервера
    pub fn complete(self, server_key: &[u8], key_salt: &[u8]) -> Result<SessionSecret> {
        let server_key: [u8; 32] = server_key.try_into().map_err(|_| {
            FgoError::ServerProtocol(format!("serverKey must be 32 bytes, got {}", server_key.len()))
        })?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(server_key));
        if !shared.was_contributory() {
            return Err(FgoError::ServerProtocol(
                "serverKey is a low-order point".to_string(),
            ));
        }
        derive_session_secret(shared.as_bytes(), key_salt)
    }
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// Ответ сервера на login/refresh
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    #[serde(with = "serde_bytes")]
    pub server_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub key_salt: Vec<u8>,
    pub session_token: String,
    /// Unix время истечения; без него используется `session_lifetime_secs`
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub key_epoch: Option<u32>,
}

impl LoginGrant {
    pub fn from_params(params: &Params) -> Result<Self> {
        let packed = pack_raw(params)?;
        let grant: Self = unpack_raw(&packed)
            .map_err(|e| FgoError::ServerProtocol(format!("malformed login grant: {}", e)))?;
        if grant.session_token.is_empty() {
            return Err(FgoError::ServerProtocol("empty session token".to_string()));
        }
        Ok(grant)
    }

    pub fn expires_at_or(&self, now: i64) -> i64 {
        self.expires_at
            .unwrap_or_else(|| now.saturating_add(Config::global().session_lifetime_secs))
    }

    /// Завершить обмен и поднять клиентский шифр
    pub fn client_cipher(&self, exchange: KeyExchange) -> Result<CatMouseCipher> {
        let secret = exchange.complete(&self.server_key, &self.key_salt)?;
        CatMouseCipher::new(&secret, Role::Client, self.key_epoch.unwrap_or(0))
    }
}

/// `userState` формы логина (арифметический сдвиг)
pub fn user_state(last_access_time: i64, user_id: i64, asset_bundle_folder_crc: i64) -> i64 {
    (last_access_time.wrapping_neg() >> 2) ^ (user_id & asset_bundle_folder_crc)
}

/// Поля формы `/login/top` поверх базовых
pub(crate) fn login_params(
    credentials: &Credentials,
    device: &DeviceInfo,
    game: &GameVersion,
    signer: &dyn RequestSigner,
    stamp: &Stamp,
    client_key: [u8; 32],
) -> Result<Params> {
    let user_id = credentials.user_id() as i64;
    let idempotency_signature = signer.sign(format!("{}{}", user_id, stamp.nonce).as_bytes())?;

    let mut params = Params::new();
    params.insert(CLIENT_KEY.into(), Value::Bin(client_key.to_vec()));
    params.insert(
        "userState".into(),
        Value::Int(user_state(stamp.timestamp, user_id, game.asset_bundle_folder_crc)),
    );
    params.insert("assetbundleFolder".into(), Value::from(game.asset_bundle_folder.as_str()));
    params.insert("isTerminalLogin".into(), Value::from("1"));
    params.insert("deviceInfo".into(), Value::from(device.fingerprint()));
    params.insert(
        "appCheckErrorMessage".into(),
        Value::from(device.app_check_error_message()),
    );
    params.insert(
        "idempotencyKeySignature".into(),
        Value::Str(b64::encode(&idempotency_signature)),
    );
    Ok(params)
}

pub(crate) fn refresh_params(client_key: [u8; 32]) -> Params {
    let mut params = Params::new();
    params.insert(CLIENT_KEY.into(), Value::Bin(client_key.to_vec()));
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherEngine;
    use x25519_dalek::StaticSecret;

    #[test]
    fn test_user_state_vector() {
        assert_eq!(user_state(1_700_000_000, 123456789, 0x5A5A5A5A), -453948464);
    }

    #[test]
    fn test_both_sides_derive_same_secret() {
        let client = KeyExchange::new();
        let server_secret = StaticSecret::random_from_rng(OsRng);
        let server_public = PublicKey::from(&server_secret);
        let salt = [9u8; 16];

        let server_shared = server_secret.diffie_hellman(&PublicKey::from(client.public_key()));
        let server_side = derive_session_secret(server_shared.as_bytes(), &salt).unwrap();
        let client_side = client.complete(server_public.as_bytes(), &salt).unwrap();
        assert_eq!(client_side.as_bytes(), server_side.as_bytes());

        let client_cipher = CatMouseCipher::new(&client_side, Role::Client, 1).unwrap();
        let server_cipher = CatMouseCipher::new(&server_side, Role::Server, 1).unwrap();
        let frame = client_cipher.encrypt(b"deck").unwrap();
        assert_eq!(server_cipher.decrypt(&frame).unwrap(), b"deck");
    }

    #[test]
    fn test_bad_server_key() {
        let client = KeyExchange::new();
        assert!(matches!(client.complete(&[1, 2, 3], b"salt"), Err(FgoError::ServerProtocol(_))));
        let client = KeyExchange::new();
        assert!(matches!(client.complete(&[0u8; 32], b"salt"), Err(FgoError::ServerProtocol(_))));
    }

    #[test]
    fn test_grant_from_params() {
        let mut params = Params::new();
        params.insert("serverKey".into(), Value::Bin(vec![7; 32]));
        params.insert("keySalt".into(), Value::Bin(vec![1; 16]));
        params.insert("sessionToken".into(), Value::from("tok"));
        params.insert("expiresAt".into(), Value::from(1_800_000_000i64));
        params.insert("unrelated".into(), Value::from(true));

        let grant = LoginGrant::from_params(&params).unwrap();
        assert_eq!(grant.session_token, "tok");
        assert_eq!(grant.expires_at_or(0), 1_800_000_000);
        assert_eq!(grant.key_epoch, None);

        params.remove("serverKey");
        assert!(matches!(LoginGrant::from_params(&params), Err(FgoError::ServerProtocol(_))));
    }
}
