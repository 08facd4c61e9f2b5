//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   RequestPipeline                        │
//! └──────────────────────────────────────────────────────────┘
//!            │                    │                   │
//!            ▼                    ▼                   ▼
//! ┌────────────────────┐ ┌──────────────────┐ ┌─────────────────┐
//! │  RequestSigner     │ │  CipherEngine    │ │  authCode       │
//! │  RSA PKCS#1 v1.5   │ │  cat / mouse     │ │  SHA1 checksum  │
//! │  SHA-256           │ │  ChaCha20-Poly   │ │  над params     │
//! └────────────────────┘ └──────────────────┘ └─────────────────┘
//!                                 ▲
//!                                 │ SessionSecret (HKDF-SHA256)
//!                        ┌──────────────────┐
//!                        │  key exchange    │
//!                        │  X25519 (login)  │
//!                        └──────────────────┘
//! ```
//!
//! ## Модули
//! - [`keys`]: учётные данные, отпечаток устройства, секрет сессии
//! - [`signer`]: подпись исходящих запросов
//! - [`cipher`]: шифрование тел protected запросов
//! - [`auth_code`]: контрольная сумма параметров

pub mod auth_code;
pub mod cipher;
pub mod keys;
pub mod signer;

pub use cipher::{CatMouseCipher, CipherEngine, Direction, Role};
pub use keys::{Credentials, DeviceInfo, SessionSecret};
pub use signer::{RequestSigner, RsaSigner};

use crate::error::{FgoError, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// HKDF-SHA256: вывести `len` байт ключевого материала
pub(crate) fn hkdf_derive_key(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hkdf.expand(info, okm.as_mut_slice())
        .map_err(|e| FgoError::KeyFormat(format!("Key derivation failed: {}", e)))?;
    Ok(okm)
}
