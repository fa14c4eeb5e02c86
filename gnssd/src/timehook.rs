//! # timehook
//!
//! Precise-time sample latching for the operating-system clock discipline.
//!
//! Clock discipline itself happens outside this daemon; all we do is latch
//! `(gnss_time, system_time)` pairs at the moment a timed fix arrives and
//! hand them to a [`ClockSink`]. A sample is only latched when the fix
//! time moves strictly forward and the session has proven itself with a
//! few valid fixes (receivers coming up off a battery-backed RTC may be
//! trusted immediately).

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::report::{GpsFix, ReportMask, TimeDelta};

/// Fixes a session must deliver before its time is trusted.
const MIN_FIXES_BEFORE_LATCH: u32 = 3;

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Receiver of latched time samples. The daemon owns one sink; PPS threads
/// and data sessions both feed it.
pub trait ClockSink: Send + Sync {
    fn put(&self, device: &str, delta: TimeDelta);
}

/// Default sink: log the offset. The shared-memory and socket exporters
/// live outside this daemon and plug in here.
#[derive(Debug, Default)]
pub struct LogClockSink;

impl ClockSink for LogClockSink {
    fn put(&self, device: &str, delta: TimeDelta) {
        let offset = (delta.gps_time - delta.system_time).num_milliseconds() as f64 / 1000.0;
        info!(device, offset_s = offset, "time sample latched");
    }
}

// ── Latch ─────────────────────────────────────────────────────────────────────

/// Per-session time latch state.
#[derive(Debug, Default)]
pub struct TimeLatch {
    last_latched: Option<DateTime<Utc>>,
    valid_fixes: u32,
    /// Trust time immediately (battery-backed RTC override).
    pub battery_rtc: bool,
}

impl TimeLatch {
    pub fn new(battery_rtc: bool) -> Self {
        Self {
            battery_rtc,
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        self.last_latched = None;
        self.valid_fixes = 0;
    }

    /// Consider one parsed report for latching. Returns the sample to
    /// hand to the sink when all gates pass.
    pub fn on_report(&mut self, mask: ReportMask, fix: &GpsFix, system_time: DateTime<Utc>) -> Option<TimeDelta> {
        if !mask.contains(ReportMask::TIME) {
            return None;
        }
        let gps_time = fix.time?;
        self.valid_fixes = self.valid_fixes.saturating_add(1);
        if self.valid_fixes < MIN_FIXES_BEFORE_LATCH && !self.battery_rtc {
            debug!(count = self.valid_fixes, "holding time latch until fixes accumulate");
            return None;
        }
        if let Some(prev) = self.last_latched {
            if gps_time <= prev {
                return None;
            }
        }
        self.last_latched = Some(gps_time);
        Some(TimeDelta {
            gps_time,
            system_time,
        })
    }
}

// ── PPS fan-in ────────────────────────────────────────────────────────────────

/// Per-device PPS companion thread.
///
/// The thread owns nothing but its receive side; the dispatcher feeds it
/// the current fix-in record (`fixin`) and the thread reports through the
/// shared sink. Dropping the handle signals the thread to exit and joins
/// it.
pub struct PpsThread {
    tx: Option<std::sync::mpsc::Sender<TimeDelta>>,
    handle: Option<std::thread::JoinHandle<()>>,
    device: String,
}

impl PpsThread {
    pub fn spawn(device: String, sink: std::sync::Arc<dyn ClockSink>) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<TimeDelta>();
        let name = device.clone();
        let handle = std::thread::Builder::new()
            .name(format!("pps:{name}"))
            .spawn(move || {
                // Edge timestamps pair with the most recent fix-in; the
                // channel closing is the exit signal.
                while let Ok(delta) = rx.recv() {
                    sink.put(&name, delta);
                }
                debug!(device = %name, "pps thread exiting");
            })
            .expect("spawn pps thread");
        Self {
            tx: Some(tx),
            handle: Some(handle),
            device,
        }
    }

    /// Dispatcher-to-thread handoff of a fresh fix-in sample.
    pub fn fixin(&self, delta: TimeDelta) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(delta);
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for PpsThread {
    fn drop(&mut self) {
        // close the channel, then join
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
