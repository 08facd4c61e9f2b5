// FGO protocol core
// Подписанные запросы, обмен ключами сессии и cat/mouse шифр battle эндпоинтов

#![warn(clippy::all)]

// Модули
pub mod client;
pub mod config;
pub mod crypto;
pub(crate) mod dispatch;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod utils;

// Re-exports для удобства
pub use client::FgoClient;
pub use config::{ClientSettings, Config, GameVersion, RecoveryPolicy};
pub use crypto::{Credentials, DeviceInfo};
pub use error::{ExecuteError, FgoError, Result, Stage};
pub use pipeline::RequestPipeline;
pub use protocol::{Params, RequestEnvelope, ResponseEnvelope, ServerFailure, Value};
pub use session::{SessionManager, SessionState};
