// Утилиты

pub mod b64;
pub mod time;
pub mod uuid;
