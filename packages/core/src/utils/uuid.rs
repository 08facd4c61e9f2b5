// Nonce для запросов (UUID v4)

use crate::error::{FgoError, Result};
use uuid::Uuid;

/// Одноразовый nonce запроса. Передаётся как `idempotencyKey` и в заголовке `X-Nonce`.
pub fn generate_nonce() -> Uuid {
    Uuid::new_v4()
}

pub fn parse_nonce(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| FgoError::ServerProtocol(format!("Invalid nonce {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonces_are_unique_v4() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
        assert_eq!(parse_nonce(&a.to_string()).unwrap(), a);
        assert!(parse_nonce("not-a-uuid").is_err());
    }
}
