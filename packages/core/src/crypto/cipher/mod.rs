//! Симметричное шифрование тел protected запросов
//!
//! - [`CipherEngine`]: интерфейс движка, одна реализация на сессию
//! - [`CatMouseCipher`]: ChaCha20-Poly1305 с раздельными ключами направлений
//! - [`ReplayWindow`]: окно отбраковки повторных фреймов

mod catmouse;
mod seq_window;

pub use catmouse::{CatMouseCipher, FRAME_HEADER_LEN, FRAME_VERSION};
pub use seq_window::ReplayWindow;

use crate::error::Result;

/// Направление трафика. Cat: клиент -> сервер, Mouse: сервер -> клиент.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Cat,
    Mouse,
}

impl Direction {
    pub fn tag(self) -> u8 {
        match self {
            Direction::Cat => b'C',
            Direction::Mouse => b'M',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'C' => Some(Direction::Cat),
            b'M' => Some(Direction::Mouse),
            _ => None,
        }
    }

    /// HKDF info для ключа направления
    pub fn kdf_info(self) -> &'static [u8] {
        match self {
            Direction::Cat => b"CatGame5",
            Direction::Mouse => b"MouseGame5",
        }
    }
}

/// Сторона соединения. Клиент шифрует cat и расшифровывает mouse, сервер наоборот.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn outbound(self) -> Direction {
        match self {
            Role::Client => Direction::Cat,
            Role::Server => Direction::Mouse,
        }
    }

    pub fn inbound(self) -> Direction {
        match self {
            Role::Client => Direction::Mouse,
            Role::Server => Direction::Cat,
        }
    }
}

/// Движок шифрования, привязанный к одной сессии
///
/// Методы принимают `&self`: один движок разделяется между параллельными
/// запросами через `Arc`, состояние счётчиков синхронизировано внутри.
pub trait CipherEngine: Send + Sync {
    /// Зашифровать plaintext в исходящем направлении
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Расшифровать фрейм входящего направления
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Вывести движок из работы после ротации ключей
    fn retire(&self);

    fn is_retired(&self) -> bool;
}
