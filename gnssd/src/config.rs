//! # config
//!
//! Daemon configuration: CLI arguments merged with environment overrides,
//! plus the contractual timeout constants.

use std::time::Duration;

use clap::Parser;

// ── Timeouts and limits ───────────────────────────────────────────────────────

/// Subscribers that never issue a command are dropped after this long.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(900);
/// A wedged subscriber (writes blocked) is dropped after this long.
pub const NOREAD_TIMEOUT: Duration = Duration::from_secs(180);
/// Grace period before an unwatched device is closed.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(60);
/// Pause between multipoll drains on a busy device.
pub const DEVICE_REAWAKE: Duration = Duration::from_millis(10);
/// Minimum spacing of device reconnect attempts.
pub const DEVICE_RECONNECT: Duration = Duration::from_secs(2);
/// Minimum spacing of NTRIP caster reconnect attempts.
pub const NTRIP_RECONNECT: Duration = Duration::from_secs(6);
/// Housekeeping tick of the dispatcher loop.
pub const DISPATCH_TICK: Duration = Duration::from_secs(2);
/// Cycles of silence before a TCP source is considered offline.
pub const ONLINE_CYCLES: f64 = 2.0;
/// Quiet multiplier before a silent device gets a new hunt baud.
pub const MINIMUM_QUIET_TIME: f64 = 0.25;

pub const MAX_DEVICES: usize = 32;
pub const MAX_SUBSCRIBERS: usize = 64;

/// Relay size caps; oversized correction frames are not forwarded.
pub const RTCM2_MAX: usize = 1024;
pub const RTCM3_MAX: usize = 1100;

/// Fallback when the services database has no "gpsd/tcp" entry.
pub const DEFAULT_PORT: u16 = 2947;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug, Clone)]
#[command(name = "gnssd", about = "GNSS receiver multiplexer and report daemon")]
pub struct Args {
    /// Listen port for subscriber connections
    #[arg(short = 'S', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Broken-device-safety: open devices read-only, send nothing
    #[arg(short = 'b', long)]
    pub readonly: bool,
    /// Do not send probes or configuration to devices
    #[arg(short = 'p', long)]
    pub passive: bool,
    /// Keep devices open even with no subscribers
    #[arg(short = 'n', long)]
    pub nowait: bool,
    /// Device paths or URIs (tcp://, udp://, ntrip://, gpsd://, /dev/...)
    pub devices: Vec<String>,
}

/// Runtime configuration, CLI plus environment.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub readonly: bool,
    pub passive: bool,
    pub nowait: bool,
    pub devices: Vec<String>,
    /// Accept devices in battery-backed-RTC mode: trust time before the
    /// third fix.
    pub battery_rtc: bool,
}

impl DaemonConfig {
    pub fn from_args(args: Args) -> Self {
        Self {
            port: std::env::var("GNSSD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(args.port),
            readonly: args.readonly,
            passive: args.passive,
            nowait: args.nowait || std::env::var("GNSSD_NOWAIT").is_ok(),
            devices: args.devices,
            battery_rtc: std::env::var("GNSSD_BATTERY_RTC").is_ok(),
        }
    }
}
