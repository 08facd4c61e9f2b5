// Cat/mouse шифр
//
// Фрейм на проводе:
//   version (1) | direction (1) | epoch (4 BE) | counter (8 BE) | AEAD(body) + tag (16)
// body:
//   len (4 BE) | plaintext | нули до кратности frame_block_size
// Nonce = prefix (4, из HKDF) || counter (8 BE). AAD = заголовок целиком.

use super::{CipherEngine, Direction, ReplayWindow, Role};
use crate::config::Config;
use crate::crypto::{hkdf_derive_key, SessionSecret};
use crate::error::{FgoError, Result};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const FRAME_VERSION: u8 = 0x05;
pub const FRAME_HEADER_LEN: usize = 1 + 1 + 4 + 8;
const TAG_LEN: usize = 16;
const LEN_PREFIX: usize = 4;
const DIRECTION_KEY_LEN: usize = 32 + 4;

struct DirectionKey {
    aead: ChaCha20Poly1305,
    prefix: [u8; 4],
}

impl DirectionKey {
    fn derive(secret: &SessionSecret, direction: Direction) -> Result<Self> {
        let okm = hkdf_derive_key(b"", secret.as_bytes(), direction.kdf_info(), DIRECTION_KEY_LEN)?;
        let aead = ChaCha20Poly1305::new(Key::from_slice(&okm[..32]));
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&okm[32..]);
        Ok(Self { aead, prefix })
    }

    fn nonce(&self, counter: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.prefix);
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }
}

struct Outbound {
    key: DirectionKey,
    next_counter: u64,
}

struct Inbound {
    key: DirectionKey,
    window: ReplayWindow,
}

pub struct CatMouseCipher {
    role: Role,
    epoch: u32,
    block_size: usize,
    outbound: Mutex<Outbound>,
    inbound: Mutex<Inbound>,
    retired: AtomicBool,
}

impl CatMouseCipher {
    /// Вывести ключи обоих направлений из секрета сессии
    pub fn new(secret: &SessionSecret, role: Role, epoch: u32) -> Result<Self> {
        let config = Config::global();
        let outbound = DirectionKey::derive(secret, role.outbound())?;
        let inbound = DirectionKey::derive(secret, role.inbound())?;

        Ok(Self {
            role,
            epoch,
            block_size: config.frame_block_size.max(1),
            outbound: Mutex::new(Outbound {
                key: outbound,
                // 0 зарезервирован: пустое окно replay трактует его как "ничего не видели"
                next_counter: 1,
            }),
            inbound: Mutex::new(Inbound {
                key: inbound,
                window: ReplayWindow::new(config.replay_window_size),
            }),
            retired: AtomicBool::new(false),
        })
    }

    fn header(&self, direction: Direction, counter: u64) -> [u8; FRAME_HEADER_LEN] {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = FRAME_VERSION;
        header[1] = direction.tag();
        header[2..6].copy_from_slice(&self.epoch.to_be_bytes());
        header[6..].copy_from_slice(&counter.to_be_bytes());
        header
    }

    fn frame_plaintext(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let len = u32::try_from(plaintext.len())
            .map_err(|_| FgoError::Encryption("plaintext longer than 4 GiB".to_string()))?;
        let unpadded = LEN_PREFIX + plaintext.len();
        let padded = unpadded.div_ceil(self.block_size) * self.block_size;

        let mut body = Vec::with_capacity(padded);
        body.extend_from_slice(&len.to_be_bytes());
        body.extend_from_slice(plaintext);
        body.resize(padded, 0);
        Ok(body)
    }

    /// Зашифровать уже собранное тело. Счётчик фиксируется только после успеха.
    fn seal_body(&self, body: &[u8]) -> Result<Vec<u8>> {
        if self.is_retired() {
            return Err(FgoError::Encryption("session keys were rotated".to_string()));
        }

        let mut outbound = self.outbound.lock().unwrap_or_else(|p| p.into_inner());
        let counter = outbound.next_counter;
        let next = counter
            .checked_add(1)
            .ok_or_else(|| FgoError::Encryption("frame counter exhausted".to_string()))?;

        let header = self.header(self.role.outbound(), counter);
        let nonce = outbound.key.nonce(counter);
        let sealed = outbound
            .key
            .aead
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: body, aad: &header })
            .map_err(|e| FgoError::Encryption(e.to_string()))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + sealed.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&sealed);

        outbound.next_counter = next;
        debug!(target: "fgo::cipher", epoch = self.epoch, counter, len = frame.len(), "frame sealed");
        Ok(frame)
    }
}

impl CipherEngine for CatMouseCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let body = self.frame_plaintext(plaintext)?;
        self.seal_body(&body)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if self.is_retired() {
            return Err(FgoError::Decryption("stale session key".to_string()));
        }
        if ciphertext.len() < FRAME_HEADER_LEN + TAG_LEN {
            return Err(FgoError::Decryption(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        let (header, sealed) = ciphertext.split_at(FRAME_HEADER_LEN);
        if header[0] != FRAME_VERSION {
            return Err(FgoError::Decryption(format!(
                "unsupported frame version {:#04x}",
                header[0]
            )));
        }
        let expected = self.role.inbound();
        if Direction::from_tag(header[1]) != Some(expected) {
            return Err(FgoError::Decryption(format!(
                "frame direction {:?} does not match expected {:?}",
                header[1] as char, expected
            )));
        }
        let mut epoch = [0u8; 4];
        epoch.copy_from_slice(&header[2..6]);
        if u32::from_be_bytes(epoch) != self.epoch {
            return Err(FgoError::Decryption("stale session key epoch".to_string()));
        }
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&header[6..]);
        let counter = u64::from_be_bytes(counter);

        // Проверка окна до расшифровки, обновление только после успешной проверки тега
        let mut inbound = self.inbound.lock().unwrap_or_else(|p| p.into_inner());
        if !inbound.window.is_fresh(counter) {
            warn!(target: "fgo::cipher", counter, highest = inbound.window.highest(), "replayed frame rejected");
            return Err(FgoError::Replay { counter });
        }
        let nonce = inbound.key.nonce(counter);
        let body = inbound
            .key
            .aead
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: sealed, aad: header })
            .map_err(|_| FgoError::Decryption("authentication tag mismatch".to_string()))?;
        inbound.window.accept(counter);
        drop(inbound);

        if body.len() < LEN_PREFIX {
            return Err(FgoError::Frame {
                declared: LEN_PREFIX,
                available: body.len(),
            });
        }
        let mut len = [0u8; LEN_PREFIX];
        len.copy_from_slice(&body[..LEN_PREFIX]);
        let declared = u32::from_be_bytes(len) as usize;
        let available = body.len() - LEN_PREFIX;
        if declared > available {
            return Err(FgoError::Frame { declared, available });
        }

        Ok(body[LEN_PREFIX..LEN_PREFIX + declared].to_vec())
    }

    fn retire(&self) {
        if !self.retired.swap(true, Ordering::SeqCst) {
            debug!(target: "fgo::cipher", epoch = self.epoch, "cipher engine retired");
        }
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CatMouseCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatMouseCipher")
            .field("role", &self.role)
            .field("epoch", &self.epoch)
            .field("retired", &self.is_retired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(seed: u8, epoch: u32) -> (CatMouseCipher, CatMouseCipher) {
        let secret = SessionSecret::from_bytes([seed; 32]);
        (
            CatMouseCipher::new(&secret, Role::Client, epoch).unwrap(),
            CatMouseCipher::new(&secret, Role::Server, epoch).unwrap(),
        )
    }

    #[test]
    fn test_client_to_server_roundtrip() {
        let (client, server) = pair(1, 7);
        let plaintext = b"\x82\xa8quest_id\xce\x05\x9a\x4b\x86\xa7deck_id\x01";
        let frame = client.encrypt(plaintext).unwrap();
        assert_eq!(frame[0], FRAME_VERSION);
        assert_eq!(frame[1], b'C');
        assert_eq!((frame.len() - FRAME_HEADER_LEN - TAG_LEN) % 16, 0);
        assert_eq!(server.decrypt(&frame).unwrap(), plaintext);

        let reply = server.encrypt(b"ok").unwrap();
        assert_eq!(reply[1], b'M');
        assert_eq!(client.decrypt(&reply).unwrap(), b"ok");
    }

    #[test]
    fn test_empty_plaintext() {
        let (client, server) = pair(2, 0);
        let frame = client.encrypt(b"").unwrap();
        assert!(server.decrypt(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_directions_are_isolated() {
        let (client, server) = pair(3, 0);
        // Клиент не принимает собственные cat фреймы
        let frame = client.encrypt(b"hello").unwrap();
        assert!(matches!(client.decrypt(&frame), Err(FgoError::Decryption(_))));

        // Даже с подменённым тегом направления ключ не подходит
        let mut forged = frame.clone();
        forged[1] = b'M';
        assert!(matches!(client.decrypt(&forged), Err(FgoError::Decryption(_))));
        assert_eq!(server.decrypt(&frame).unwrap(), b"hello");
    }

    #[test]
    fn test_counter_is_monotonic_and_ciphertexts_differ() {
        let (client, _) = pair(4, 0);
        let first = client.encrypt(b"same").unwrap();
        let second = client.encrypt(b"same").unwrap();
        assert_ne!(first, second);
        assert_eq!(&first[6..14], &1u64.to_be_bytes());
        assert_eq!(&second[6..14], &2u64.to_be_bytes());
    }

    #[test]
    fn test_replay_is_rejected() {
        let (client, server) = pair(5, 0);
        let frame = client.encrypt(b"battle").unwrap();
        assert!(server.decrypt(&frame).is_ok());
        assert_eq!(server.decrypt(&frame), Err(FgoError::Replay { counter: 1 }));
    }

    #[test]
    fn test_tampered_frame_does_not_burn_counter() {
        let (client, server) = pair(6, 0);
        let frame = client.encrypt(b"payload").unwrap();
        let mut tampered = frame.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert!(matches!(server.decrypt(&tampered), Err(FgoError::Decryption(_))));
        assert_eq!(server.decrypt(&frame).unwrap(), b"payload");
    }

    #[test]
    fn test_retired_engine_rejects_frames() {
        let (client, server) = pair(7, 1);
        let reply = server.encrypt(b"late").unwrap();
        client.retire();
        assert!(matches!(client.decrypt(&reply), Err(FgoError::Decryption(_))));
        assert!(matches!(client.encrypt(b"x"), Err(FgoError::Encryption(_))));
    }

    #[test]
    fn test_rotated_keys_reject_old_frames() {
        let (_, old_server) = pair(8, 1);
        let (new_client, _) = pair(9, 2);
        let reply = old_server.encrypt(b"old").unwrap();
        assert!(matches!(new_client.decrypt(&reply), Err(FgoError::Decryption(_))));
    }

    #[test]
    fn test_declared_length_beyond_body_is_frame_error() {
        let (client, server) = pair(10, 0);
        let body = [0, 0, 0, 99, 1, 2, 3];
        let frame = server.seal_body(&body).unwrap();
        assert_eq!(
            client.decrypt(&frame),
            Err(FgoError::Frame {
                declared: 99,
                available: 3
            })
        );
    }

    #[test]
    fn test_truncated_ciphertext() {
        let (client, _) = pair(11, 0);
        assert!(matches!(client.decrypt(&[FRAME_VERSION, b'M']), Err(FgoError::Decryption(_))));
    }
}
