//! Pipeline timing statistics and CPU load history.
//!
//! The real-time tasks record per-stage durations with
//! [`StatsAggregator::update`]; the display task reads them back with
//! [`StatsAggregator::snapshot`] to draw the debug overlay. A single mutex
//! guards everything and is only ever held for a constant-time update or
//! copy, so the high-priority NN task never waits on the display task for
//! longer than a struct copy.
//!
//! # CPU load
//!
//! [`StatsAggregator::cpu_load_sample`] is called once per display
//! iteration. Slot 0 of an 8-entry history always holds the latest sample;
//! older slots shift down only once the two most recently shifted samples are
//! at least [`DECIMATION_MS`] apart, so the tail of the ring keeps roughly one
//! sample per second. [`StatsAggregator::cpu_load`] derives three loads from
//! it: the last iteration, the last second and the last five seconds.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;
use vision_hal::{Clock, RunTimeCounters};

/// Number of samples kept in the CPU load history.
pub const CPU_LOAD_HISTORY: usize = 8;

/// Minimum spacing between decimated CPU load samples.
pub const DECIMATION_MS: u32 = 1000;

// =============================================================================
// Timing statistics
// =============================================================================

/// Timed pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// One full NN task iteration.
    NnTotal,
    /// Accelerator run only.
    NnInference,
    /// Output decoding in the display task.
    NnPostprocess,
    /// One full display task iteration that produced a frame.
    DisplayTotal,
    /// Overlay rendering.
    DisplayRender,
    /// Encode and hand-off to the streaming sink.
    DisplayEncode,
}

impl Metric {
    /// Every metric, in report order.
    pub const ALL: [Metric; 6] = [
        Metric::NnTotal,
        Metric::NnInference,
        Metric::NnPostprocess,
        Metric::DisplayTotal,
        Metric::DisplayRender,
        Metric::DisplayEncode,
    ];

    /// Field name used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NnTotal => "nn_total",
            Self::NnInference => "nn_inference",
            Self::NnPostprocess => "nn_pp",
            Self::DisplayTotal => "disp_total",
            Self::DisplayRender => "disp_display",
            Self::DisplayEncode => "disp_enc",
        }
    }
}

/// Running statistic of one timed stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimeStat {
    /// Most recent value.
    pub last: u32,
    /// Number of recorded values.
    pub total: u64,
    /// Sum of every recorded value.
    pub acc: u64,
    /// Lifetime mean, `acc / total`.
    pub mean: f32,
}

impl TimeStat {
    fn record(&mut self, value: u32) {
        self.last = value;
        self.acc += u64::from(value);
        self.total += 1;
        self.mean = self.acc as f32 / self.total as f32;
    }
}

/// Copy of every timing statistic, taken atomically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatInfo {
    /// [`Metric::NnTotal`]
    pub nn_total: TimeStat,
    /// [`Metric::NnInference`]
    pub nn_inference: TimeStat,
    /// [`Metric::NnPostprocess`]
    pub nn_pp: TimeStat,
    /// [`Metric::DisplayTotal`]
    pub disp_total: TimeStat,
    /// [`Metric::DisplayRender`]
    pub disp_display: TimeStat,
    /// [`Metric::DisplayEncode`]
    pub disp_enc: TimeStat,
}

impl StatInfo {
    /// Statistic for `metric`.
    #[must_use]
    pub fn get(&self, metric: Metric) -> &TimeStat {
        match metric {
            Metric::NnTotal => &self.nn_total,
            Metric::NnInference => &self.nn_inference,
            Metric::NnPostprocess => &self.nn_pp,
            Metric::DisplayTotal => &self.disp_total,
            Metric::DisplayRender => &self.disp_display,
            Metric::DisplayEncode => &self.disp_enc,
        }
    }

    fn get_mut(&mut self, metric: Metric) -> &mut TimeStat {
        match metric {
            Metric::NnTotal => &mut self.nn_total,
            Metric::NnInference => &mut self.nn_inference,
            Metric::NnPostprocess => &mut self.nn_pp,
            Metric::DisplayTotal => &mut self.disp_total,
            Metric::DisplayRender => &mut self.disp_display,
            Metric::DisplayEncode => &mut self.disp_enc,
        }
    }
}

// =============================================================================
// CPU load
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct CpuSample {
    total: u64,
    thread: u64,
    tick: u32,
}

/// CPU load percentages over three horizons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuLoad {
    /// Between the two most recent samples.
    pub last: f32,
    /// Over roughly the last second.
    pub one_second: f32,
    /// Over roughly the last five seconds.
    pub five_seconds: f32,
}

fn load_between(newer: &CpuSample, older: &CpuSample) -> f32 {
    let total = newer.total.saturating_sub(older.total);
    if total == 0 {
        return 0.0;
    }
    let thread = newer.thread.saturating_sub(older.thread);
    100.0 * thread as f32 / total as f32
}

struct Inner {
    stats: StatInfo,
    history: [CpuSample; CPU_LOAD_HISTORY],
}

/// Mutex-guarded timing statistics and CPU load history.
pub struct StatsAggregator {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    counters: Arc<dyn RunTimeCounters>,
}

impl StatsAggregator {
    /// Creates an empty aggregator reading time from `clock` and scheduler
    /// accounting from `counters`.
    pub fn new(clock: Arc<dyn Clock>, counters: Arc<dyn RunTimeCounters>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stats: StatInfo::default(),
                history: [CpuSample::default(); CPU_LOAD_HISTORY],
            }),
            clock,
            counters,
        }
    }

    /// Records one duration for `metric`.
    pub fn update(&self, metric: Metric, value_ms: u32) {
        self.inner.lock().stats.get_mut(metric).record(value_ms);
    }

    /// Runs `f` and records its wall time for `metric`.
    pub fn time<R>(&self, metric: Metric, f: impl FnOnce() -> R) -> R {
        let start = self.clock.now_ms();
        let out = f();
        self.update(metric, self.clock.now_ms().wrapping_sub(start));
        out
    }

    /// Current millisecond tick of the aggregator's clock.
    #[must_use]
    pub fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Point read of one statistic.
    #[must_use]
    pub fn stat(&self, metric: Metric) -> TimeStat {
        *self.inner.lock().stats.get(metric)
    }

    /// Consistent copy of every statistic.
    #[must_use]
    pub fn snapshot(&self) -> StatInfo {
        self.inner.lock().stats
    }

    /// Refreshes the newest CPU load sample and decimates the history.
    pub fn cpu_load_sample(&self) {
        let total = self.counters.total();
        let idle = self.counters.idle();
        let sample = CpuSample {
            total,
            thread: total.saturating_sub(idle),
            tick: self.clock.now_ms(),
        };

        let mut inner = self.inner.lock();
        let h = &mut inner.history;
        h[1] = h[0];
        h[0] = sample;
        if h[1].tick.wrapping_sub(h[2].tick) < DECIMATION_MS {
            return;
        }
        h.copy_within(1..CPU_LOAD_HISTORY - 1, 2);
        trace!(tick = sample.tick, "cpu load history shifted");
    }

    /// CPU load over the last iteration, second and five seconds.
    #[must_use]
    pub fn cpu_load(&self) -> CpuLoad {
        let inner = self.inner.lock();
        let h = &inner.history;
        CpuLoad {
            last: load_between(&h[0], &h[1]),
            one_second: load_between(&h[2], &h[3]),
            five_seconds: load_between(&h[2], &h[7]),
        }
    }
}
