//! Окно replay-защиты для входящих фреймов
//!
//! Хранит максимальный принятый счётчик и битовую карту последних `size`
//! счётчиков. Бит 0 соответствует `highest`, бит N соответствует `highest - N`.
//! Не потокобезопасно: владелец держит окно под мьютексом.

#[derive(Debug, Clone)]
pub struct ReplayWindow {
    highest: u64,
    seen: u128,
    size: u64,
}

impl ReplayWindow {
    pub const MAX_SIZE: u64 = 128;

    /// Размер вне диапазона 1..=128 приводится к ближайшей границе
    pub fn new(size: u64) -> Self {
        Self {
            highest: 0,
            seen: 0,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    fn is_empty(&self) -> bool {
        self.highest == 0 && self.seen == 0
    }

    /// Счётчик ещё не принимался и не выпал из окна. Состояние не меняется.
    pub fn is_fresh(&self, counter: u64) -> bool {
        if self.is_empty() {
            return true;
        }
        if counter.saturating_add(self.size) <= self.highest {
            return false;
        }
        if counter > self.highest {
            return true;
        }
        self.seen & (1u128 << (self.highest - counter)) == 0
    }

    /// Отметить счётчик как принятый. Возвращает false для повтора.
    pub fn accept(&mut self, counter: u64) -> bool {
        if !self.is_fresh(counter) {
            return false;
        }
        if self.is_empty() {
            self.highest = counter;
            self.seen = 1;
            return true;
        }
        if counter > self.highest {
            let shift = counter - self.highest;
            self.seen = if shift >= 128 { 1 } else { (self.seen << shift) | 1 };
            self.highest = counter;
        } else {
            self.seen |= 1u128 << (self.highest - counter);
        }
        true
    }

    pub fn highest(&self) -> u64 {
        self.highest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_then_replay() {
        let mut window = ReplayWindow::new(128);
        for i in 1..=50 {
            assert!(window.accept(i));
        }
        assert!(!window.accept(50));
        assert!(!window.accept(7));
        assert_eq!(window.highest(), 50);
    }

    #[test]
    fn test_out_of_order_inside_window() {
        let mut window = ReplayWindow::new(128);
        assert!(window.accept(5));
        assert!(window.accept(3));
        assert!(window.accept(4));
        assert!(!window.accept(3));
        assert!(window.is_fresh(2));
    }

    #[test]
    fn test_small_window_rejects_old() {
        let mut window = ReplayWindow::new(4);
        for i in 1..=10 {
            assert!(window.accept(i));
        }
        // 6 = 10 - 4, уже за пределами окна
        assert!(!window.is_fresh(6));
        assert!(!window.accept(6));
    }

    #[test]
    fn test_large_jump_resets_bitmap() {
        let mut window = ReplayWindow::new(128);
        assert!(window.accept(1));
        assert!(window.accept(10_000));
        assert!(!window.accept(1));
        assert!(window.accept(9_999));
    }

    #[test]
    fn test_size_is_clamped() {
        let mut window = ReplayWindow::new(0);
        assert!(window.accept(1));
        assert!(window.accept(2));
        assert!(!window.accept(1));
    }
}
