//! Board-level I/O: user button, LEDs, time base and run-time counters.

/// Momentary user button.
pub trait Button: Send + Sync {
    /// True while the button is held down.
    fn is_pressed(&self) -> bool;
}

/// On-board LED colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedColor {
    /// Green status LED.
    Green,
    /// Red status LED (lit while a host is streaming).
    Red,
}

/// LED bank.
pub trait Led: Send + Sync {
    /// Switches `color` on or off.
    fn set(&self, color: LedColor, on: bool);
}

/// Millisecond tick source; wraps at `u32::MAX`.
pub trait Clock: Send + Sync {
    /// Current tick in milliseconds.
    fn now_ms(&self) -> u32;
}

/// Scheduler run-time accounting.
pub trait RunTimeCounters: Send + Sync {
    /// Total run-time ticks since boot.
    fn total(&self) -> u64;

    /// Ticks spent in the idle task since boot.
    fn idle(&self) -> u64;
}
