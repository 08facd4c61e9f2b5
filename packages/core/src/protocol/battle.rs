// Вспомогательные функции для battle эндпоинтов

use flate2::Crc;

/// Контрольная сумма `battleStatus` для запроса `/battle/result`
///
/// CRC-32 от пяти i64 (little-endian), смешанных с константами клиента.
pub fn battle_status(user_id: i64, battle_id: i64) -> u32 {
    let values: [i64; 5] = [
        user_id.wrapping_add(1),
        -0x408FD5,
        0,
        battle_id.wrapping_sub(0x7FFF_FFFF),
        -0x25ACF6,
    ];

    let mut crc = Crc::new();
    for value in values {
        crc.update(&value.to_le_bytes());
    }
    crc.sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(battle_status(123456789, 987654321), 1890867897);
        assert_eq!(battle_status(1, 1), 3624783943);
    }

    #[test]
    fn test_depends_on_both_ids() {
        let base = battle_status(100, 200);
        assert_ne!(base, battle_status(101, 200));
        assert_ne!(base, battle_status(100, 201));
    }
}
