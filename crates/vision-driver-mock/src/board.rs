//! Button, LEDs, clocks and run-time counters.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;
use vision_hal::{Button, Clock, Led, LedColor, RunTimeCounters};

/// Button whose state is set by the test or simulation.
#[derive(Debug, Default)]
pub struct MockButton {
    pressed: AtomicBool,
}

impl MockButton {
    /// Released button.
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds or releases the button.
    pub fn set_pressed(&self, pressed: bool) {
        self.pressed.store(pressed, Ordering::SeqCst);
    }
}

impl Button for MockButton {
    fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }
}

/// Two-LED bank.
#[derive(Debug, Default)]
pub struct MockLed {
    green: AtomicBool,
    red: AtomicBool,
}

impl MockLed {
    /// Both LEDs off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `color` is lit.
    pub fn is_on(&self, color: LedColor) -> bool {
        self.slot(color).load(Ordering::SeqCst)
    }

    fn slot(&self, color: LedColor) -> &AtomicBool {
        match color {
            LedColor::Green => &self.green,
            LedColor::Red => &self.red,
        }
    }
}

impl Led for MockLed {
    fn set(&self, color: LedColor, on: bool) {
        self.slot(color).store(on, Ordering::SeqCst);
    }
}

/// Millisecond tick since construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Clock starting at 0 now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // truncation is the 32-bit tick wrap
        self.origin.elapsed().as_millis() as u32
    }
}

/// Clock advanced explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    tick: AtomicU32,
}

impl ManualClock {
    /// Clock at `start_ms`.
    pub fn new(start_ms: u32) -> Self {
        Self {
            tick: AtomicU32::new(start_ms),
        }
    }

    /// Moves time forward, wrapping.
    pub fn advance(&self, ms: u32) {
        self.tick.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.tick.load(Ordering::SeqCst)
    }
}

/// Run-time counters reporting a fixed busy percentage of wall time.
#[derive(Debug)]
pub struct MockRunTimeCounters {
    origin: Instant,
    load_bits: AtomicU32,
}

impl MockRunTimeCounters {
    /// Counters for a CPU that is `load_percent` busy.
    pub fn new(load_percent: f32) -> Self {
        Self {
            origin: Instant::now(),
            load_bits: AtomicU32::new(load_percent.clamp(0.0, 100.0).to_bits()),
        }
    }

    /// Changes the simulated load.
    pub fn set_load(&self, load_percent: f32) {
        self.load_bits
            .store(load_percent.clamp(0.0, 100.0).to_bits(), Ordering::SeqCst);
    }

    fn load(&self) -> f64 {
        f64::from(f32::from_bits(self.load_bits.load(Ordering::SeqCst)))
    }
}

impl RunTimeCounters for MockRunTimeCounters {
    fn total(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn idle(&self) -> u64 {
        let total = self.total();
        total - (total as f64 * self.load() / 100.0) as u64
    }
}
