// Валидация ответов сервера до и после декодирования

use crate::error::{FgoError, Result};
use crate::protocol::envelope::RES_CODE_OK;
use crate::protocol::transport::{header, WireResponse};
use uuid::Uuid;

/// Сессия недействительна (истекла/отозвана)
pub const RES_CODE_SESSION_INVALID: &str = "91";
/// Подпись запроса не принята
pub const RES_CODE_SIGNATURE_REJECTED: &str = "92";

/// Отказ сервера в аутентификации
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    SessionInvalid,
    SignatureRejected,
}

impl AuthFailure {
    pub fn describe(self) -> &'static str {
        match self {
            AuthFailure::SessionInvalid => "server rejected the session",
            AuthFailure::SignatureRejected => "server rejected the request signature",
        }
    }
}

/// Проверка HTTP статуса до расшифровки тела
///
/// `Ok(Some(_))` для 401/403, `Err(Transport)` для 5xx (повторяемо),
/// `Err(ServerProtocol)` для прочих не-2xx.
pub fn check_http_status(status: u16) -> Result<Option<AuthFailure>> {
    match status {
        200..=299 => Ok(None),
        401 => Ok(Some(AuthFailure::SessionInvalid)),
        403 => Ok(Some(AuthFailure::SignatureRejected)),
        500..=599 => Err(FgoError::Transport(format!("server returned HTTP {}", status))),
        _ => Err(FgoError::ServerProtocol(format!("unexpected HTTP status {}", status))),
    }
}

pub fn classify_res_code(res_code: &str) -> Option<AuthFailure> {
    match res_code {
        RES_CODE_SESSION_INVALID => Some(AuthFailure::SessionInvalid),
        RES_CODE_SIGNATURE_REJECTED => Some(AuthFailure::SignatureRejected),
        _ => None,
    }
}

/// Ответ на plain запрос не может быть зашифрован
pub fn check_protection(request_protected: bool, response: &WireResponse) -> Result<()> {
    if response.is_protected() && !request_protected {
        return Err(FgoError::ServerProtocol(
            "encrypted response to a plain request".to_string(),
        ));
    }
    Ok(())
}

/// Успешный ответ protected эндпоинта обязан быть зашифрован
pub fn check_plain_answer(request_protected: bool, res_code: &str) -> Result<()> {
    if request_protected && res_code == RES_CODE_OK {
        return Err(FgoError::ServerProtocol(
            "protected endpoint answered in plaintext".to_string(),
        ));
    }
    Ok(())
}

/// Если сервер вернул X-Nonce, он должен совпадать с nonce запроса
pub fn verify_nonce_echo(request_nonce: &Uuid, response: &WireResponse) -> Result<()> {
    match response.header(header::NONCE) {
        None => Ok(()),
        Some(echo) => {
            let echoed = crate::utils::uuid::parse_nonce(echo)?;
            if echoed != *request_nonce {
                return Err(FgoError::ServerProtocol(format!(
                    "nonce echo mismatch: sent {}, got {}",
                    request_nonce, echoed
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classes() {
        assert_eq!(check_http_status(200).unwrap(), None);
        assert_eq!(check_http_status(401).unwrap(), Some(AuthFailure::SessionInvalid));
        assert_eq!(check_http_status(403).unwrap(), Some(AuthFailure::SignatureRejected));
        assert!(check_http_status(503).unwrap_err().is_retryable());
        assert!(matches!(check_http_status(404), Err(FgoError::ServerProtocol(_))));
    }

    #[test]
    fn test_res_codes() {
        assert_eq!(classify_res_code("91"), Some(AuthFailure::SessionInvalid));
        assert_eq!(classify_res_code("92"), Some(AuthFailure::SignatureRejected));
        assert_eq!(classify_res_code("00"), None);
        assert_eq!(classify_res_code("88"), None);
    }

    #[test]
    fn test_protection_mismatch() {
        let encrypted = WireResponse::new(200, vec![]).with_header(header::PROTECTED, "1");
        assert!(check_protection(false, &encrypted).is_err());
        assert!(check_protection(true, &encrypted).is_ok());
        assert!(check_plain_answer(true, "00").is_err());
        assert!(check_plain_answer(true, "91").is_ok());
    }

    #[test]
    fn test_nonce_echo() {
        let nonce = Uuid::new_v4();
        let ok = WireResponse::new(200, vec![]).with_header(header::NONCE, nonce.to_string());
        assert!(verify_nonce_echo(&nonce, &ok).is_ok());
        assert!(verify_nonce_echo(&nonce, &WireResponse::new(200, vec![])).is_ok());

        let other = WireResponse::new(200, vec![]).with_header(header::NONCE, Uuid::new_v4().to_string());
        assert!(matches!(verify_nonce_echo(&nonce, &other), Err(FgoError::ServerProtocol(_))));
    }
}
