// Время

use chrono::Utc;

/// Текущее UTC время в секундах (unix timestamp)
pub fn now() -> i64 {
    Utc::now().timestamp()
}
