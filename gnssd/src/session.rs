//! # session
//!
//! Per-device session engine.
//!
//! ## Architecture
//! The engine itself is I/O-agnostic: reader tasks own the descriptors and
//! feed raw byte slabs into [`DeviceSession::multipoll`], which drives the
//! lexer, dispatches accepted frames to the matching driver, merges the
//! fix, detects reporting-cycle boundaries and latches time samples. The
//! dispatcher consumes the resulting [`Emission`]s.
//!
//! ## Invariants
//! - Frames reach the fan-out in lexer-accept order.
//! - Every end-of-cycle report is preceded by a cycle-clear since the
//!   previous report.
//! - Driver-supplied fix fields survive the merge untouched.

use std::time::Instant;

use chrono::Utc;
use gnss_frame::{Frame, Lexer, Protocol};
use tokio::net::{TcpStream, UdpSocket};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::{MINIMUM_QUIET_TIME, ONLINE_CYCLES};
use crate::dop::fill_dops;
use crate::drivers::{driver_for, Driver, DriverRuntime};
use crate::fixups::merge_derived;
use crate::ntrip::{NtripResponse, NtripSession, NtripState};
use crate::report::{GpsFix, ReportMask, SkyView, TimeDelta};
use crate::timehook::TimeLatch;
use crate::uri::{DeviceTarget, DeviceUri, ServiceType, SourceType};

// ── Autobaud ladder ───────────────────────────────────────────────────────────

/// Hunt settings in probe order; wrap-around is allowed and a failure to
/// sync at any rung is never fatal.
pub const BAUD_LADDER: &[u32] = &[4800, 9600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800];

// ── Engine types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Activate,
    Reactivate,
    DriverSwitch,
    Deactivate,
}

/// Result of one multipoll drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multipoll {
    /// At least one frame was dispatched.
    Ready,
    /// Input consumed, no complete frame yet.
    Unready,
    Error,
    Eof,
    /// NTRIP negotiation still in flight.
    Unchanged,
}

/// What a drain produced, in order.
#[derive(Debug, Clone)]
pub enum Emission {
    /// Every accepted frame, for relay and raw-mode fan-out.
    Frame(Frame, ReportMask),
    /// End-of-cycle merged report.
    Report(Box<GpsFix>, SkyView, ReportMask),
    /// Latched time sample for the clock sink.
    TimeSample(TimeDelta),
}

/// Input to a multipoll step, as the reader task saw it.
#[derive(Debug)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    Eof,
    Error(std::io::Error),
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct DeviceSession {
    pub uri: DeviceUri,
    pub lexer: Lexer,
    pub runtime: DriverRuntime,
    pub driver: Option<&'static Driver>,
    /// Sticky driver remembered across transient frames.
    pub last_controller: Option<&'static Driver>,
    pub packets_since_switch: u32,
    /// Fix being accumulated this cycle.
    fix: GpsFix,
    /// Last reported fix and the one before it, for rate derivation.
    last_fix: GpsFix,
    prev_fix: GpsFix,
    sky: SkyView,
    cycle_mask: ReportMask,
    cycle_open: bool,
    pub latch: TimeLatch,
    pub ntrip: Option<NtripSession>,
    pub baud_index: usize,
    pub fixed_baud: Option<u32>,
    pub online: Option<Instant>,
    last_read: Option<Instant>,
    /// Start of the current reporting cycle and the character counter
    /// snapshot taken there, for bandwidth reporting.
    pub start_of_cycle: Option<Instant>,
    pub chars_at_cycle_start: u64,
    /// Pending request for the reader task to re-tune the serial line.
    pub want_baud: Option<u32>,
}

impl DeviceSession {
    pub fn new(uri: DeviceUri, battery_rtc: bool) -> Self {
        let ntrip = match (&uri.service, &uri.target) {
            (ServiceType::Ntrip, DeviceTarget::Ntrip(spec)) => Some(NtripSession::new(spec.clone())),
            _ => None,
        };
        Self {
            uri,
            lexer: Lexer::new(),
            runtime: DriverRuntime::new(),
            driver: None,
            last_controller: None,
            packets_since_switch: 0,
            fix: GpsFix::default(),
            last_fix: GpsFix::default(),
            prev_fix: GpsFix::default(),
            sky: SkyView::default(),
            cycle_mask: ReportMask::empty(),
            cycle_open: false,
            latch: TimeLatch::new(battery_rtc),
            ntrip,
            baud_index: 0,
            fixed_baud: None,
            online: None,
            last_read: None,
            start_of_cycle: None,
            chars_at_cycle_start: 0,
            want_baud: None,
        }
    }

    pub fn min_cycle(&self) -> f64 {
        self.driver.map(|d| d.min_cycle).unwrap_or(1.0)
    }

    /// Activate: arm the lexer and fire the reactivate hook on a known
    /// driver.
    pub fn activate(&mut self) {
        self.lexer.reset();
        self.latch.reset();
        self.cycle_open = false;
        self.online = Some(Instant::now());
        let event = if self.driver.is_some() { SessionEvent::Reactivate } else { SessionEvent::Activate };
        self.event_hook(event);
    }

    /// Deactivate: event hook, quiesce, clear the online stamp.
    pub fn deactivate(&mut self) {
        self.event_hook(SessionEvent::Deactivate);
        self.online = None;
        self.lexer.reset();
    }

    fn event_hook(&self, event: SessionEvent) {
        debug!(device = %self.uri.raw, ?event, driver = self.driver.map(|d| d.name), "session event");
    }

    /// Quiet-period detection: an empty accumulator plus a long-enough
    /// gap since the previous read marks the start of a reporting cycle.
    fn note_read(&mut self, now: Instant) {
        if self.lexer.pending() == 0 {
            if let Some(prev) = self.last_read {
                let gap = now.duration_since(prev).as_secs_f64();
                if gap > MINIMUM_QUIET_TIME * self.min_cycle() {
                    self.start_of_cycle = Some(now);
                    self.chars_at_cycle_start = self.lexer.chars_seen();
                }
            } else {
                self.start_of_cycle = Some(now);
                self.chars_at_cycle_start = self.lexer.chars_seen();
            }
        }
        self.last_read = Some(now);
        self.online = Some(now);
    }

    /// The online-timestamp heuristic: a TCP source that has been silent
    /// longer than two cycles is considered offline (never UDP).
    pub fn seems_offline(&self, now: Instant) -> bool {
        if self.uri.source == SourceType::Udp {
            return false;
        }
        match self.online {
            Some(t) => now.duration_since(t).as_secs_f64() > ONLINE_CYCLES * self.min_cycle(),
            None => true,
        }
    }

    /// One read-and-parse pass: drain every frame the accumulated input
    /// yields. The heart of `multipoll`.
    pub fn multipoll(&mut self, outcome: ReadOutcome, now: Instant, emissions: &mut Vec<Emission>) -> Multipoll {
        let data = match outcome {
            ReadOutcome::Data(d) => d,
            ReadOutcome::Eof => {
                if self.uri.source.eof_means_gone() && self.seems_offline(now) {
                    return Multipoll::Eof;
                }
                return Multipoll::Unready;
            }
            ReadOutcome::Error(err) => {
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted) {
                    return Multipoll::Unready;
                }
                warn!(device = %self.uri.raw, %err, "device read error");
                return Multipoll::Error;
            }
        };

        // NTRIP negotiation rides the same byte stream until established
        if let Some(ntrip) = self.ntrip.as_mut() {
            match ntrip.state {
                NtripState::SentGet => {
                    let (resp, rest) = ntrip.feed_response(&data);
                    match resp {
                        NtripResponse::Pending => return Multipoll::Unchanged,
                        NtripResponse::Refused(_) => return Multipoll::Error,
                        NtripResponse::Accepted { chunked } => {
                            self.lexer.set_chunked(chunked);
                            if rest.is_empty() {
                                return Multipoll::Unchanged;
                            }
                            return self.drain(rest, now, emissions);
                        }
                    }
                }
                NtripState::Init | NtripState::Closed | NtripState::Error => return Multipoll::Unchanged,
                NtripState::Established | NtripState::SentProbe => {}
            }
        }

        self.drain(data, now, emissions)
    }

    /// Advance at most one frame; None when the accumulator holds no
    /// complete frame yet.
    pub fn poll(&mut self, emissions: &mut Vec<Emission>) -> Option<ReportMask> {
        let frame = self.lexer.next_frame()?;
        let mask = self.dispatch_frame(frame, emissions);
        if mask.contains(ReportMask::REPORT) {
            self.close_cycle(emissions);
        }
        Some(mask)
    }

    fn drain(&mut self, data: Vec<u8>, now: Instant, emissions: &mut Vec<Emission>) -> Multipoll {
        self.note_read(now);
        self.lexer.feed(&data);
        let mut any = false;
        while self.poll(emissions).is_some() {
            any = true;
        }
        // two consecutive bad frames on an unpinned TTY advance the hunt
        if self.lexer.bad_count() >= 2 && self.uri.source.is_tty() && self.fixed_baud.is_none() {
            self.next_hunt_baud();
        }
        if any {
            Multipoll::Ready
        } else {
            Multipoll::Unready
        }
    }

    /// Advance the autobaud ladder and ask the reader to re-tune.
    pub fn next_hunt_baud(&mut self) {
        self.baud_index = (self.baud_index + 1) % BAUD_LADDER.len();
        let baud = BAUD_LADDER[self.baud_index];
        info!(device = %self.uri.raw, baud, "hunting to next baud");
        self.want_baud = Some(baud);
        self.lexer.reset();
        self.lexer.clear_bad_count();
    }

    /// Driver selection and the per-frame parse.
    fn dispatch_frame(&mut self, frame: Frame, emissions: &mut Vec<Emission>) -> ReportMask {
        let mut mask = ReportMask::empty();

        if frame.protocol != Protocol::Bad && frame.protocol != Protocol::Comment {
            mask |= self.select_driver(frame.protocol);
        } else if frame.protocol == Protocol::Comment {
            // a transient frame right after a switch hands control back
            self.maybe_reinstate_sticky();
        }

        if !self.cycle_open && !matches!(frame.protocol, Protocol::Bad | Protocol::Comment) {
            // first packet after the quiet period opens the cycle
            self.cycle_open = true;
            self.fix = GpsFix::default();
            self.cycle_mask = ReportMask::CLEAR;
            mask |= ReportMask::CLEAR;
        }

        let parse_mask = self.runtime.parse_frame(&frame, &mut self.fix, &mut self.sky);
        mask |= parse_mask;
        self.cycle_mask |= parse_mask;
        self.packets_since_switch = self.packets_since_switch.saturating_add(1);

        emissions.push(Emission::Frame(frame, mask));
        mask
    }

    /// Scan the driver table on a frame-type mismatch.
    fn select_driver(&mut self, packet_type: Protocol) -> ReportMask {
        let current = self.driver;
        if let Some(cur) = current {
            if cur.packet_type == packet_type {
                return ReportMask::empty();
            }
            // a mode-switching binary driver may legitimately emit NMEA
            // while reverting modes; do not switch away from it
            if packet_type == Protocol::Nmea && cur.packet_type != Protocol::Nmea && cur.mode_switcher {
                return ReportMask::empty();
            }
        }
        let next = match driver_for(packet_type) {
            Some(d) => d,
            None => return ReportMask::empty(),
        };
        if let Some(cur) = current {
            if cur.sticky {
                self.last_controller = Some(cur);
            }
            info!(device = %self.uri.raw, from = cur.name, to = next.name, "driver switch");
        } else {
            info!(device = %self.uri.raw, driver = next.name, "driver identified");
        }
        self.driver = Some(next);
        self.packets_since_switch = 0;
        self.event_hook(SessionEvent::DriverSwitch);
        ReportMask::DRIVER
    }

    /// A sticky previous controller is reinstated when the current
    /// non-sticky driver only produced a transient (comment) frame.
    pub fn maybe_reinstate_sticky(&mut self) {
        if let (Some(cur), Some(last)) = (self.driver, self.last_controller) {
            if !cur.sticky && last.sticky && self.packets_since_switch <= 1 {
                debug!(device = %self.uri.raw, driver = last.name, "reinstating sticky driver");
                self.driver = Some(last);
            }
        }
    }

    /// End of cycle: derive, snapshot, rotate the fix triple, latch time.
    fn close_cycle(&mut self, emissions: &mut Vec<Emission>) {
        // DOP fill-in from the sky view, never overwriting driver DOPs
        let computed = fill_dops(&self.sky.satellites);
        let d = &mut self.sky.dops;
        for (have, got) in [
            (&mut d.xdop, computed.xdop),
            (&mut d.ydop, computed.ydop),
            (&mut d.hdop, computed.hdop),
            (&mut d.vdop, computed.vdop),
            (&mut d.pdop, computed.pdop),
            (&mut d.tdop, computed.tdop),
            (&mut d.gdop, computed.gdop),
        ] {
            if have.is_nan() {
                *have = got;
            }
        }

        merge_derived(&mut self.fix, &self.last_fix, &self.sky.dops);

        if let Some(sample) = self.latch.on_report(self.cycle_mask, &self.fix, Utc::now()) {
            emissions.push(Emission::TimeSample(sample));
        }

        let mask = self.cycle_mask | ReportMask::REPORT;
        debug!(
            device = %self.uri.raw,
            cycle_bytes = self.cycle_chars(),
            mode = ?self.fix.mode,
            "reporting cycle closed"
        );
        emissions.push(Emission::Report(Box::new(self.fix.clone()), self.sky.clone(), mask));

        self.prev_fix = std::mem::replace(&mut self.last_fix, self.fix.clone());
        self.cycle_open = false;
        self.cycle_mask = ReportMask::empty();
    }

    /// Bytes seen this cycle, for bandwidth reporting.
    pub fn cycle_chars(&self) -> u64 {
        self.lexer.chars_seen().saturating_sub(self.chars_at_cycle_start)
    }

    pub fn last_fix(&self) -> &GpsFix {
        &self.last_fix
    }
}

// ── Descriptor opening ────────────────────────────────────────────────────────

/// What `open` produced; the reader task takes ownership.
pub enum DeviceHandle {
    Tcp(TcpStream),
    Udp(UdpSocket),
    Serial(tokio_serial::SerialStream),
    File(tokio::fs::File),
    /// PPS-only device: no data channel to read.
    PpsOnly,
}

pub enum OpenOutcome {
    Opened(DeviceHandle),
    /// Not open yet, retry later (NTRIP in progress, PPS-only).
    Placeholding,
    /// Give up on this device.
    Unallocated(std::io::Error),
}

/// Resolve and open the descriptor for a device URI. Non-blocking mode is
/// inherent to every tokio handle produced here.
pub async fn open_device(session: &mut DeviceSession) -> OpenOutcome {
    let uri = session.uri.clone();
    match (&uri.source, &uri.target) {
        (SourceType::Pps, _) => OpenOutcome::Placeholding,
        (SourceType::Udp, DeviceTarget::Net { host, port }) => {
            // datagram sensors bind locally and accept from the sender
            match UdpSocket::bind((host.as_str(), *port)).await {
                Ok(sock) => OpenOutcome::Opened(DeviceHandle::Udp(sock)),
                Err(err) => {
                    warn!(device = %uri.raw, %err, "udp bind failed");
                    OpenOutcome::Unallocated(err)
                }
            }
        }
        (_, DeviceTarget::Net { host, port }) => match TcpStream::connect((host.as_str(), *port)).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                OpenOutcome::Opened(DeviceHandle::Tcp(stream))
            }
            Err(err) => {
                warn!(device = %uri.raw, %err, "connect failed");
                OpenOutcome::Unallocated(err)
            }
        },
        (_, DeviceTarget::Ntrip(spec)) => {
            let ntrip = match session.ntrip.as_mut() {
                Some(n) => n,
                None => return OpenOutcome::Unallocated(std::io::Error::other("ntrip state missing")),
            };
            let now = Instant::now();
            if !ntrip.may_reconnect(now) {
                return OpenOutcome::Placeholding;
            }
            match TcpStream::connect((spec.host.as_str(), spec.port)).await {
                Ok(stream) => {
                    ntrip.mark_attempt(now);
                    let request = ntrip.request();
                    use tokio::io::AsyncWriteExt;
                    let mut stream = stream;
                    if let Err(err) = stream.write_all(request.as_bytes()).await {
                        warn!(device = %uri.raw, %err, "ntrip request failed");
                        ntrip.close();
                        return OpenOutcome::Placeholding;
                    }
                    OpenOutcome::Opened(DeviceHandle::Tcp(stream))
                }
                Err(err) => {
                    warn!(device = %uri.raw, %err, "ntrip connect failed");
                    ntrip.mark_attempt(now);
                    ntrip.close();
                    OpenOutcome::Placeholding
                }
            }
        }
        (source, DeviceTarget::Path(path)) if source.is_tty() => {
            let baud = session.fixed_baud.unwrap_or(BAUD_LADDER[session.baud_index]);
            match tokio_serial::new(path, baud).open_native_async() {
                Ok(serial) => OpenOutcome::Opened(DeviceHandle::Serial(serial)),
                Err(err) => {
                    warn!(device = %uri.raw, %err, "serial open failed");
                    OpenOutcome::Unallocated(std::io::Error::other(err))
                }
            }
        }
        (_, DeviceTarget::Path(path)) => match tokio::fs::File::open(path).await {
            Ok(file) => OpenOutcome::Opened(DeviceHandle::File(file)),
            Err(err) => OpenOutcome::Unallocated(err),
        },
        (_, DeviceTarget::CanIf(ifname)) => {
            // NMEA2000 frames arrive pre-delimited from the CAN interface;
            // opening it takes a socketcan descriptor this build does not
            // carry. Treated as a placeholder.
            warn!(device = %uri.raw, ifname, "nmea2000 interface support not built in");
            OpenOutcome::Placeholding
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::parse_uri;

    const GGA: &[u8] = b"$GPGGA,181908.00,3404.7041778,N,07044.3966270,W,4,13,1.00,495.144,M,29.200,M,0.10,0000*40\r\n";
    const RMC: &[u8] = b"$GPRMC,225446,A,4916.45,N,12311.12,W,000.5,054.7,191194,020.3,E*68\r\n";

    fn tcp_session() -> DeviceSession {
        DeviceSession::new(parse_uri("tcp://localhost:3001").unwrap(), false)
    }

    fn drain_all(session: &mut DeviceSession, data: &[u8]) -> (Multipoll, Vec<Emission>) {
        let mut emissions = Vec::new();
        let status = session.multipoll(ReadOutcome::Data(data.to_vec()), Instant::now(), &mut emissions);
        (status, emissions)
    }

    #[test]
    fn nmea_cycle_produces_clear_then_report() {
        let mut session = tcp_session();
        session.activate();
        let (status, emissions) = drain_all(&mut session, GGA);
        assert_eq!(status, Multipoll::Ready);
        // frame emission plus one report
        let frames: Vec<_> = emissions.iter().filter(|e| matches!(e, Emission::Frame(..))).collect();
        assert_eq!(frames.len(), 1);
        let report = emissions.iter().find_map(|e| match e {
            Emission::Report(fix, _, mask) => Some((fix, mask)),
            _ => None,
        });
        let (fix, mask) = report.expect("cycle report");
        assert!(mask.contains(ReportMask::REPORT));
        assert!(mask.contains(ReportMask::CLEAR));
        assert!((fix.latitude - 34.078403).abs() < 1e-5);
        // derived: alt HAE from MSL + separation
        assert!((fix.alt_hae - (495.144 + 29.2)).abs() < 1e-6);
    }

    #[test]
    fn driver_identified_on_first_frame() {
        let mut session = tcp_session();
        session.activate();
        let (_, emissions) = drain_all(&mut session, GGA);
        assert_eq!(session.driver.unwrap().name, "NMEA0183");
        match &emissions[0] {
            Emission::Frame(_, mask) => assert!(mask.contains(ReportMask::DRIVER)),
            other => panic!("expected frame first, got {other:?}"),
        }
    }

    #[test]
    fn frames_emitted_in_accept_order() {
        let mut session = tcp_session();
        session.activate();
        let mut stream = GGA.to_vec();
        stream.extend_from_slice(RMC);
        let (_, emissions) = drain_all(&mut session, &stream);
        let kinds: Vec<Protocol> = emissions
            .iter()
            .filter_map(|e| match e {
                Emission::Frame(f, _) => Some(f.protocol),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![Protocol::Nmea, Protocol::Nmea]);
    }

    #[test]
    fn every_report_preceded_by_clear() {
        let mut session = tcp_session();
        session.activate();
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(GGA);
            stream.extend_from_slice(RMC);
        }
        let (_, emissions) = drain_all(&mut session, &stream);
        let mut cleared = false;
        for e in &emissions {
            match e {
                Emission::Frame(_, mask) if mask.contains(ReportMask::CLEAR) => cleared = true,
                Emission::Report(_, _, mask) => {
                    assert!(mask.contains(ReportMask::REPORT));
                    assert!(cleared, "report without a preceding cycle clear");
                    cleared = false;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn binary_mode_switcher_ignores_nmea_revert() {
        let mut session = tcp_session();
        session.activate();
        session.driver = driver_for(Protocol::Ubx);
        let (_, _) = drain_all(&mut session, GGA);
        // an NMEA frame under the u-blox driver does not switch it away
        assert_eq!(session.driver.unwrap().name, "u-blox");
    }

    #[test]
    fn non_mode_switcher_switches_to_nmea() {
        let mut session = tcp_session();
        session.activate();
        session.driver = driver_for(Protocol::GarminBin);
        let (_, _) = drain_all(&mut session, GGA);
        assert_eq!(session.driver.unwrap().name, "NMEA0183");
    }

    #[test]
    fn bad_frames_on_tty_advance_the_hunt() {
        let mut session = DeviceSession::new(parse_uri("/dev/ttyUSB0").unwrap(), false);
        session.activate();
        let start_index = session.baud_index;
        let mut bad = GGA.to_vec();
        let star = bad.iter().rposition(|&b| b == b'*').unwrap();
        bad[star + 1] = b'F';
        let mut stream = bad.clone();
        stream.extend_from_slice(&bad);
        let mut emissions = Vec::new();
        session.multipoll(ReadOutcome::Data(stream), Instant::now(), &mut emissions);
        assert_ne!(session.baud_index, start_index);
        assert!(session.want_baud.is_some());
    }

    #[test]
    fn bad_frames_on_tcp_never_hunt() {
        let mut session = tcp_session();
        session.activate();
        let mut bad = GGA.to_vec();
        let star = bad.iter().rposition(|&b| b == b'*').unwrap();
        bad[star + 1] = b'F';
        let mut stream = bad.clone();
        stream.extend_from_slice(&bad);
        let mut emissions = Vec::new();
        session.multipoll(ReadOutcome::Data(stream), Instant::now(), &mut emissions);
        assert!(session.want_baud.is_none());
    }

    #[test]
    fn tcp_online_heuristic_gates_eof() {
        use std::time::Duration;
        let mut session = tcp_session();
        session.activate();
        let now = Instant::now();
        assert!(!session.seems_offline(now));
        // silent for more than two cycles: considered offline
        assert!(session.seems_offline(now + Duration::from_secs(3)));
        // a zero-byte read before the heuristic trips is not an EOF
        let mut emissions = Vec::new();
        assert_eq!(session.multipoll(ReadOutcome::Eof, now, &mut emissions), Multipoll::Unready);
        assert_eq!(
            session.multipoll(ReadOutcome::Eof, now + Duration::from_secs(3), &mut emissions),
            Multipoll::Eof
        );
    }

    #[test]
    fn udp_eof_is_not_fatal() {
        let mut session = DeviceSession::new(parse_uri("udp://0.0.0.0:9999").unwrap(), false);
        session.activate();
        let mut emissions = Vec::new();
        let status = session.multipoll(ReadOutcome::Eof, Instant::now(), &mut emissions);
        assert_eq!(status, Multipoll::Unready);
    }

    #[test]
    fn time_sample_latched_after_three_timed_cycles() {
        let mut session = tcp_session();
        session.activate();
        let lines = [
            "$GPRMC,225446,A,4916.45,N,12311.12,W,000.5,054.7,191194,020.3,E*68\r\n",
            "$GPRMC,225447,A,4916.45,N,12311.12,W,000.5,054.7,191194,020.3,E*69\r\n",
            "$GPRMC,225448,A,4916.45,N,12311.12,W,000.5,054.7,191194,020.3,E*66\r\n",
        ];
        let mut samples = 0;
        for line in lines {
            let (_, emissions) = drain_all(&mut session, line.as_bytes());
            samples += emissions.iter().filter(|e| matches!(e, Emission::TimeSample(_))).count();
        }
        assert_eq!(samples, 1);
    }
}
