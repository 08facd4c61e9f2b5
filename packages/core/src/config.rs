//! Централизованная конфигурация протокольного ядра
//!
//! Два уровня:
//! - [`Config`]: глобальные параметры протокола (таймауты, ретраи, окно replay)
//! - [`ClientSettings`]: настройки одного клиента, которые передаёт внешний слой конфигурации

use crate::error::{FgoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // СЕССИЯ
    // ============================================

    /// Время жизни сессии, если сервер не прислал `expiresAt` (в секундах)
    pub session_lifetime_secs: i64,

    /// За сколько секунд до истечения сессии выполнять refresh
    pub session_refresh_margin_secs: i64,

    /// Сколько подряд отклонённых подписей переводят сессию в Invalidated
    pub max_signature_rejections: u32,

    // ============================================
    // CAT/MOUSE CIPHER
    // ============================================

    /// Размер окна replay-защиты (1..=128)
    pub replay_window_size: u64,

    /// Выравнивание фрейма plaintext перед шифрованием (в байтах)
    pub frame_block_size: usize,

    // ============================================
    // СЕТЕВЫЕ ПАРАМЕТРЫ
    // ============================================

    /// Дополнительные попытки для идемпотентных запросов при TransportError
    pub max_transport_retries: u32,

    /// Начальная задержка exponential backoff (в миллисекундах)
    pub retry_initial_backoff_ms: u64,

    /// Максимальная задержка exponential backoff (в миллисекундах)
    pub retry_max_backoff_ms: u64,

    /// Таймаут HTTP запроса (в секундах)
    pub http_timeout_secs: u64,
}

impl Config {
    /// Создать конфигурацию с дефолтными значениями
    pub fn default() -> Self {
        Self {
            // Сессия
            session_lifetime_secs: 60 * 60,
            session_refresh_margin_secs: 60,
            max_signature_rejections: 3,

            // Cipher
            replay_window_size: 128,
            frame_block_size: 16,

            // Сеть
            max_transport_retries: 2,
            retry_initial_backoff_ms: 200,
            retry_max_backoff_ms: 2000,
            http_timeout_secs: 30,
        }
    }

    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FGO_SESSION_LIFETIME_SECS") {
            if let Ok(parsed) = val.parse() {
                config.session_lifetime_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("FGO_SESSION_REFRESH_MARGIN_SECS") {
            if let Ok(parsed) = val.parse() {
                config.session_refresh_margin_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("FGO_MAX_TRANSPORT_RETRIES") {
            if let Ok(parsed) = val.parse() {
                config.max_transport_retries = parsed;
            }
        }

        if let Ok(val) = std::env::var("FGO_RETRY_MAX_BACKOFF_MS") {
            if let Ok(parsed) = val.parse() {
                config.retry_max_backoff_ms = parsed;
            }
        }

        if let Ok(val) = std::env::var("FGO_HTTP_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                config.http_timeout_secs = parsed;
            }
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_from_env() -> std::result::Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> std::result::Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }

    /// Задержка перед попыткой `attempt` (0 = первая повторная попытка)
    pub fn retry_backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.retry_initial_backoff_ms
            .saturating_mul(factor)
            .min(self.retry_max_backoff_ms)
    }
}

/// Что делать с `execute`, когда сессия в состоянии Expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Вернуть `SessionExpired`; повторный логин инициирует вызывающий
    #[default]
    Manual,
    /// Выполнить один общий логин и продолжить запрос
    Relogin,
}

/// Версия клиента игры, отправляемая в каждом запросе
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameVersion {
    pub app_ver: String,
    pub ver_code: String,
    pub data_ver: i64,
    pub date_ver: i64,
    pub asset_bundle_folder: String,
    pub asset_bundle_folder_crc: i64,
}

/// Настройки одного клиента
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Базовый URL API, например `https://game.example.com`
    pub host: String,
    pub x_unity_version: String,
    pub game: GameVersion,

    /// Эндпоинты, тела которых шифруются cat/mouse шифром
    #[serde(default = "default_protected_endpoints")]
    pub protected_endpoints: BTreeSet<String>,

    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,

    /// `None`, если сервер не поддерживает refresh без полного логина
    #[serde(default = "default_refresh_endpoint")]
    pub refresh_endpoint: Option<String>,

    #[serde(default)]
    pub recovery: RecoveryPolicy,
}

fn default_protected_endpoints() -> BTreeSet<String> {
    ["/battle/setup", "/battle/result"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_login_endpoint() -> String {
    "/login/top".to_string()
}

fn default_refresh_endpoint() -> Option<String> {
    Some("/login/refresh".to_string())
}

impl ClientSettings {
    pub fn new(host: impl Into<String>, x_unity_version: impl Into<String>, game: GameVersion) -> Self {
        Self {
            host: host.into(),
            x_unity_version: x_unity_version.into(),
            game,
            protected_endpoints: default_protected_endpoints(),
            login_endpoint: default_login_endpoint(),
            refresh_endpoint: default_refresh_endpoint(),
            recovery: RecoveryPolicy::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| FgoError::Config(format!("Invalid client settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(FgoError::Config(format!(
                "host must be an http(s) URL, got {:?}",
                self.host
            )));
        }
        let paths = self
            .protected_endpoints
            .iter()
            .chain(std::iter::once(&self.login_endpoint))
            .chain(self.refresh_endpoint.iter());
        for path in paths {
            if !path.starts_with('/') {
                return Err(FgoError::Config(format!(
                    "endpoint path must start with '/': {:?}",
                    path
                )));
            }
        }
        Ok(())
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_endpoints.contains(path)
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_refresh_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.refresh_endpoint = endpoint;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session_lifetime_secs, 3600);
        assert_eq!(config.max_transport_retries, 2);
        assert_eq!(config.replay_window_size, 128);
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        let config = Config::default();
        assert_eq!(config.retry_backoff_ms(0), 200);
        assert_eq!(config.retry_backoff_ms(1), 400);
        assert_eq!(config.retry_backoff_ms(10), 2000);
        assert_eq!(config.retry_backoff_ms(200), 2000);
    }

    #[test]
    fn test_settings_from_json_applies_defaults() {
        let json = r#"{
            "host": "https://game.example.com",
            "x_unity_version": "2022.3.28f1",
            "game": {
                "app_ver": "2.90.0",
                "ver_code": "abc",
                "data_ver": 900,
                "date_ver": 1700000000,
                "asset_bundle_folder": "folder",
                "asset_bundle_folder_crc": 1515870810
            }
        }"#;
        let settings = ClientSettings::from_json_str(json).unwrap();
        assert!(settings.is_protected("/battle/result"));
        assert!(!settings.is_protected("/shop/purchase"));
        assert_eq!(settings.login_endpoint, "/login/top");
        assert_eq!(settings.refresh_endpoint.as_deref(), Some("/login/refresh"));
        assert_eq!(settings.recovery, RecoveryPolicy::Manual);
    }

    #[test]
    fn test_settings_reject_bad_host() {
        let game = GameVersion {
            app_ver: "1".into(),
            ver_code: "v".into(),
            data_ver: 1,
            date_ver: 1,
            asset_bundle_folder: "f".into(),
            asset_bundle_folder_crc: 0,
        };
        let settings = ClientSettings::new("game.example.com", "2022", game);
        assert!(matches!(settings.validate(), Err(FgoError::Config(_))));
    }
}
