//! # dispatcher
//!
//! The central event loop.
//!
//! ## Architecture
//! One task owns the [`Daemon`] value — device table, subscriber table and
//! shared context — and consumes a single event channel fed by peripheral
//! tasks: the accept loops, one reader task per device descriptor, and one
//! request reader per subscriber. All lexer/decoder/session state is
//! mutated only here; subscriber writes leave through bounded channels to
//! per-subscriber writer tasks, which serializes them without holding any
//! lock across a read or parse.
//!
//! A 2-second housekeeping tick drives device release and reconnect
//! policy, quiet-device baud hunting, and subscriber timeouts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use gnss_frame::{Frame, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{
    DaemonConfig, COMMAND_TIMEOUT, DEVICE_REAWAKE, DEVICE_RECONNECT, DISPATCH_TICK, MAX_DEVICES,
    MAX_SUBSCRIBERS, RELEASE_TIMEOUT, RTCM2_MAX, RTCM3_MAX,
};
use crate::json_out;
use crate::report::ReportMask;
use crate::session::{open_device, DeviceHandle, DeviceSession, Emission, Multipoll, OpenOutcome, ReadOutcome};
use crate::subscriber::{parse_requests, read_requests, spawn_writer, Request, Subscriber, WatchPolicy};
use crate::timehook::{ClockSink, PpsThread};
use crate::uri::{parse_uri, SourceType};

/// Signal flag: handlers only set this; the loop observes it between
/// events.
pub static SIGNALLED: AtomicBool = AtomicBool::new(false);

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum Event {
    NewClient(TcpStream, std::net::SocketAddr),
    ClientLine { id: usize, line: String },
    ClientGone { id: usize },
    DeviceRead { idx: usize, outcome: ReadOutcome },
    /// Reader task exited; the descriptor is gone.
    DeviceGone { idx: usize },
}

// ── Tables ────────────────────────────────────────────────────────────────────

struct DeviceEntry {
    session: DeviceSession,
    open: bool,
    activated: Option<DateTime<Utc>>,
    reader: Option<tokio::task::JoinHandle<()>>,
    /// Correction bytes relayed into the device go through here.
    correction_tx: Option<mpsc::Sender<Vec<u8>>>,
    baud_tx: Option<watch::Sender<u32>>,
    release_at: Option<Instant>,
    last_open_attempt: Option<Instant>,
}

struct SubEntry {
    sub: Subscriber,
    writer: tokio::task::JoinHandle<()>,
    reader: tokio::task::JoinHandle<()>,
}

pub struct Daemon {
    cfg: DaemonConfig,
    devices: Vec<Option<DeviceEntry>>,
    subscribers: Vec<Option<SubEntry>>,
    events_tx: mpsc::Sender<Event>,
    clock_sink: Arc<dyn ClockSink>,
    pps_threads: Vec<PpsThread>,
    pub start_time: DateTime<Utc>,
    /// Current leap-second offset, learned from RTCM3 system parameters.
    leap_seconds: Option<u8>,
}

impl Daemon {
    pub fn new(cfg: DaemonConfig, clock_sink: Arc<dyn ClockSink>) -> (Self, mpsc::Receiver<Event>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let daemon = Self {
            cfg,
            devices: (0..MAX_DEVICES).map(|_| None).collect(),
            subscribers: (0..MAX_SUBSCRIBERS).map(|_| None).collect(),
            events_tx,
            clock_sink,
            pps_threads: Vec::new(),
            start_time: Utc::now(),
            leap_seconds: None,
        };
        (daemon, events_rx)
    }

    pub fn events_tx(&self) -> mpsc::Sender<Event> {
        self.events_tx.clone()
    }

    // ── Device table ──────────────────────────────────────────────────────

    /// Allocate a slot (scanning from the front) and open the device.
    pub async fn add_device(&mut self, path: &str) -> bool {
        let uri = match parse_uri(path) {
            Ok(u) => u,
            Err(err) => {
                warn!(device = path, %err, "rejecting device");
                return false;
            }
        };
        let Some(idx) = self.devices.iter().position(Option::is_none) else {
            warn!(device = path, "device table full");
            return false;
        };
        let mut session = DeviceSession::new(uri, self.cfg.battery_rtc);
        if session.uri.source == SourceType::Pps {
            self.pps_threads.push(PpsThread::spawn(path.to_string(), self.clock_sink.clone()));
        }
        session.activate();
        self.devices[idx] = Some(DeviceEntry {
            session,
            open: false,
            activated: None,
            reader: None,
            correction_tx: None,
            baud_tx: None,
            release_at: None,
            last_open_attempt: None,
        });
        self.try_open(idx).await;
        true
    }

    async fn try_open(&mut self, idx: usize) {
        let Some(entry) = self.devices[idx].as_mut() else { return };
        entry.last_open_attempt = Some(Instant::now());
        match open_device(&mut entry.session).await {
            OpenOutcome::Opened(handle) => {
                let (correction_tx, correction_rx) = mpsc::channel(16);
                let (baud_tx, baud_rx) = watch::channel(0u32);
                entry.reader = Some(spawn_reader(idx, handle, self.events_tx.clone(), correction_rx, baud_rx));
                entry.correction_tx = Some(correction_tx);
                entry.baud_tx = Some(baud_tx);
                entry.open = true;
                entry.activated = Some(Utc::now());
                entry.release_at = None;
                info!(device = %entry.session.uri.raw, "device opened");
                let notice = json_out::device(&entry.session.uri.raw, None, entry.activated);
                self.broadcast_json(&notice);
            }
            OpenOutcome::Placeholding => {
                debug!(device = %entry.session.uri.raw, "open placeholding, will retry");
            }
            OpenOutcome::Unallocated(err) => {
                warn!(device = %entry.session.uri.raw, %err, "open failed");
            }
        }
    }

    fn close_device(&mut self, idx: usize, reason: &str) {
        if let Some(entry) = self.devices[idx].as_mut() {
            info!(device = %entry.session.uri.raw, reason, "closing device");
            entry.session.deactivate();
            if let Some(reader) = entry.reader.take() {
                reader.abort();
            }
            entry.correction_tx = None;
            entry.baud_tx = None;
            entry.open = false;
            entry.activated = None;
        }
    }

    // ── Subscriber table ──────────────────────────────────────────────────

    fn accept_client(&mut self, stream: TcpStream, addr: std::net::SocketAddr) {
        let Some(id) = self.subscribers.iter().position(Option::is_none) else {
            info!(%addr, "subscriber table full, rejecting");
            tokio::spawn(async move {
                let mut stream = stream;
                let _ = stream.write_all(&json_out::error("too many subscribers")).await;
            });
            return;
        };
        let _ = stream.set_nodelay(true);
        let _ = stream.set_linger(Some(std::time::Duration::from_secs(1)));
        let (read_half, write_half) = stream.into_split();
        let (tx, writer) = spawn_writer(write_half);
        let reader = tokio::spawn(read_requests(read_half, id, self.events_tx.clone()));
        let sub = Subscriber::new(addr, tx);
        sub.send(json_out::version());
        self.subscribers[id] = Some(SubEntry { sub, writer, reader });
        info!(%addr, id, "subscriber connected");
    }

    fn detach_subscriber(&mut self, id: usize, reason: &str) {
        if let Some(entry) = self.subscribers[id].take() {
            info!(addr = %entry.sub.addr, id, reason, "subscriber detached");
            entry.reader.abort();
            // writer drains its queue and exits when the channel closes
            drop(entry.sub);
            let _ = entry.writer;
        }
    }

    fn broadcast_json(&mut self, line: &[u8]) {
        let mut dead = Vec::new();
        for (id, slot) in self.subscribers.iter().enumerate() {
            if let Some(entry) = slot {
                if entry.sub.policy.json && !entry.sub.send(line.to_vec()) {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.detach_subscriber(id, "write failed");
        }
    }

    /// Any subscriber watching the given device path?
    fn watched(&self, path: &str) -> bool {
        self.subscribers
            .iter()
            .flatten()
            .any(|e| e.sub.policy.watching(path))
    }

    // ── Requests ──────────────────────────────────────────────────────────

    fn handle_client_line(&mut self, id: usize, line: &str) {
        let Some(entry) = self.subscribers[id].as_mut() else { return };
        entry.sub.touch();
        for request in parse_requests(line) {
            match request {
                Request::Watch(body) => {
                    if let Some(body) = body {
                        match serde_json::from_value::<WatchPolicy>(body) {
                            Ok(policy) => {
                                if let Some(entry) = self.subscribers[id].as_mut() {
                                    entry.sub.policy = policy;
                                }
                            }
                            Err(err) => {
                                self.send_to(id, json_out::error(&format!("invalid WATCH: {err}")));
                                continue;
                            }
                        }
                        let devices = self.device_list();
                        self.send_to(id, json_out::devices(&devices));
                    }
                    if let Some(entry) = self.subscribers[id].as_ref() {
                        let echo = json_out::watch_echo(&entry.sub.policy);
                        self.send_to(id, echo);
                    }
                }
                Request::Devices => {
                    let devices = self.device_list();
                    self.send_to(id, json_out::devices(&devices));
                }
                Request::Poll => {
                    let lines: Vec<Vec<u8>> = self
                        .devices
                        .iter()
                        .flatten()
                        .filter(|e| e.open)
                        .map(|e| json_out::tpv(&e.session.uri.raw, e.session.last_fix()))
                        .collect();
                    for line in lines {
                        self.send_to(id, line);
                    }
                }
                Request::Version => self.send_to(id, json_out::version()),
                Request::Unknown(cmd) => {
                    self.send_to(id, json_out::error(&format!("unrecognized request {cmd:?}")));
                }
            }
        }
    }

    fn device_list(&self) -> Vec<(String, Option<&'static str>)> {
        self.devices
            .iter()
            .flatten()
            .map(|e| (e.session.uri.raw.clone(), e.session.driver.map(|d| d.name)))
            .collect()
    }

    fn send_to(&mut self, id: usize, line: Vec<u8>) {
        let dead = match self.subscribers[id].as_ref() {
            Some(entry) => !entry.sub.send(line),
            None => false,
        };
        if dead {
            self.detach_subscriber(id, "write failed");
        }
    }

    // ── Device events and fan-out ─────────────────────────────────────────

    fn handle_device_read(&mut self, idx: usize, outcome: ReadOutcome) {
        let now = Instant::now();
        let mut emissions = Vec::new();
        let status = match self.devices[idx].as_mut() {
            Some(entry) => entry.session.multipoll(outcome, now, &mut emissions),
            None => return,
        };
        match status {
            Multipoll::Eof => {
                self.close_device(idx, "end of stream");
            }
            Multipoll::Error => {
                self.close_device(idx, "read error");
            }
            Multipoll::Ready | Multipoll::Unready | Multipoll::Unchanged => {}
        }
        // pending autobaud request goes to the reader task
        if let Some(entry) = self.devices[idx].as_mut() {
            if let Some(baud) = entry.session.want_baud.take() {
                if let Some(tx) = &entry.baud_tx {
                    let _ = tx.send(baud);
                }
            }
        }
        self.fan_out(idx, emissions);
    }

    /// Route one device's emissions: correction relay, time propagation,
    /// and subscriber delivery ordered as accepted.
    fn fan_out(&mut self, idx: usize, emissions: Vec<Emission>) {
        let (path, driver_name) = match self.devices[idx].as_ref() {
            Some(e) => (e.session.uri.raw.clone(), e.session.driver.map(|d| d.name)),
            None => return,
        };
        for emission in emissions {
            match emission {
                Emission::Frame(frame, mask) => {
                    if matches!(frame.protocol, Protocol::Bad | Protocol::Comment) {
                        continue;
                    }
                    if mask.contains(ReportMask::DRIVER) && self.watched(&path) {
                        // a newly identified device a client cares about is
                        // kept awake and announced
                        if let Some(entry) = self.devices[idx].as_mut() {
                            entry.release_at = None;
                        }
                        let notice = json_out::device(&path, driver_name, Some(Utc::now()));
                        self.broadcast_json(&notice);
                    }
                    if matches!(frame.protocol, Protocol::Rtcm2 | Protocol::Rtcm3) {
                        self.note_system_params(idx);
                        self.relay_corrections(idx, &frame);
                    }
                    self.raw_fan_out(&path, &frame);
                }
                Emission::Report(fix, sky, mask) => {
                    let tpv = json_out::tpv(&path, &fix);
                    let sky_line = if mask.intersects(ReportMask::SATELLITE | ReportMask::DOP) {
                        Some(json_out::sky(&path, &sky))
                    } else {
                        None
                    };
                    let mut nmea_lines: Vec<Vec<u8>> = Vec::new();
                    if self.any_nmea_watcher(&path) {
                        if let Some(rmc) = json_out::synth_rmc(&fix) {
                            nmea_lines.push(rmc);
                        }
                        if let Some(gga) = json_out::synth_gga(&fix, sky.used_count()) {
                            nmea_lines.push(gga);
                        }
                        nmea_lines.push(json_out::synth_gsa(&fix, &sky));
                        if mask.contains(ReportMask::SATELLITE) {
                            nmea_lines.extend(json_out::synth_gsv(&sky));
                        }
                    }
                    let mut dead = Vec::new();
                    for (id, slot) in self.subscribers.iter().enumerate() {
                        let Some(entry) = slot else { continue };
                        if !entry.sub.policy.watching(&path) {
                            continue;
                        }
                        let mut ok = true;
                        if entry.sub.policy.json {
                            ok &= entry.sub.send(tpv.clone());
                            if let Some(sky_line) = &sky_line {
                                ok &= entry.sub.send(sky_line.clone());
                            }
                        }
                        if entry.sub.policy.nmea {
                            for line in &nmea_lines {
                                ok &= entry.sub.send(line.clone());
                            }
                        }
                        if !ok {
                            dead.push(id);
                        }
                    }
                    for id in dead {
                        self.detach_subscriber(id, "write failed");
                    }
                }
                Emission::TimeSample(delta) => {
                    self.clock_sink.put(&path, delta);
                    // propagate the fix-in to every PPS companion thread
                    for pps in &self.pps_threads {
                        pps.fixin(delta);
                    }
                }
            }
        }
    }

    /// Raw-mode delivery of one accepted frame.
    fn raw_fan_out(&mut self, path: &str, frame: &Frame) {
        let textual = frame.protocol.is_textual();
        let mut dead = Vec::new();
        for (id, slot) in self.subscribers.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let policy = &entry.sub.policy;
            if !policy.watching(path) {
                continue;
            }
            let payload = if textual && (policy.raw >= 1 || policy.nmea) {
                Some(frame.payload.clone())
            } else if !textual && policy.raw == 1 {
                Some(json_out::hexdump(&frame.payload))
            } else if !textual && policy.raw >= 2 {
                Some(frame.payload.clone())
            } else {
                None
            };
            if let Some(payload) = payload {
                if !entry.sub.send(payload) {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.detach_subscriber(id, "write failed");
        }
    }

    /// Pick the leap-second offset out of a decoded type-1013 message.
    fn note_system_params(&mut self, idx: usize) {
        if let Some(entry) = self.devices[idx].as_ref() {
            if let Some(msg) = &entry.session.runtime.last_rtcm3 {
                if let gnss_rtcm3::Rtcm3Body::SystemParams(params) = &msg.body {
                    if self.leap_seconds != Some(params.leap_seconds) {
                        info!(leap_seconds = params.leap_seconds, "leap-second offset updated");
                        self.leap_seconds = Some(params.leap_seconds);
                    }
                }
            }
        }
    }

    /// Fire-and-forget RTCM relay into every other correction-capable
    /// device. Oversized frames are dropped; a read-only daemon never
    /// writes into a receiver.
    fn relay_corrections(&mut self, src_idx: usize, frame: &Frame) {
        if self.cfg.readonly {
            return;
        }
        let cap = match frame.protocol {
            Protocol::Rtcm2 => RTCM2_MAX,
            _ => RTCM3_MAX,
        };
        if frame.payload.len() > cap {
            debug!(len = frame.payload.len(), "oversized correction frame not relayed");
            return;
        }
        for (idx, slot) in self.devices.iter().enumerate() {
            if idx == src_idx {
                continue;
            }
            let Some(entry) = slot else { continue };
            if !entry.open {
                continue;
            }
            let writable = entry.session.driver.map(|d| d.rtcm_writer).unwrap_or(false);
            if !writable {
                continue;
            }
            if let Some(tx) = &entry.correction_tx {
                // best-effort: a full queue loses the frame, never blocks
                let _ = tx.try_send(frame.payload.clone());
            }
        }
    }

    fn any_nmea_watcher(&self, path: &str) -> bool {
        self.subscribers
            .iter()
            .flatten()
            .any(|e| e.sub.policy.nmea && e.sub.policy.watching(path))
    }

    // ── Housekeeping ──────────────────────────────────────────────────────

    async fn on_tick(&mut self) {
        let now = Instant::now();

        // subscriber command timeout
        let stale: Vec<usize> = self
            .subscribers
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                let entry = slot.as_ref()?;
                (!entry.sub.policy.enable && entry.sub.last_activity.elapsed() > COMMAND_TIMEOUT).then_some(id)
            })
            .collect();
        for id in stale {
            self.detach_subscriber(id, "command timeout");
        }

        for idx in 0..self.devices.len() {
            let (path, open, recognized, quiet, tty_unpinned, is_ntrip, last_attempt, source) =
                match self.devices[idx].as_ref() {
                    Some(e) => (
                        e.session.uri.raw.clone(),
                        e.open,
                        e.session.driver.is_some(),
                        e.session.seems_offline(now),
                        e.session.uri.source.is_tty() && e.session.fixed_baud.is_none(),
                        e.session.ntrip.is_some(),
                        e.last_open_attempt,
                        e.session.uri.source,
                    ),
                    None => continue,
                };
            if open {
                // release an identified but unwatched device after grace
                let watched = self.watched(&path);
                let nowait = self.cfg.nowait;
                let entry = self.devices[idx].as_mut().unwrap();
                if recognized && !watched && !nowait {
                    match entry.release_at {
                        None => entry.release_at = Some(now + RELEASE_TIMEOUT),
                        Some(at) if now >= at => {
                            self.close_device(idx, "released, no subscribers");
                            continue;
                        }
                        Some(_) => {}
                    }
                } else {
                    entry.release_at = None;
                }
                // quiet device: hunt the TTY or re-drive NTRIP
                if quiet {
                    if tty_unpinned {
                        let entry = self.devices[idx].as_mut().unwrap();
                        entry.session.next_hunt_baud();
                        if let (Some(baud), Some(tx)) = (entry.session.want_baud.take(), &entry.baud_tx) {
                            let _ = tx.send(baud);
                        }
                    } else if is_ntrip {
                        self.close_device(idx, "ntrip stream stalled");
                        self.try_open(idx).await;
                    }
                }
            } else {
                // reconnect pacing: 2 s for plain devices; NTRIP adds its
                // own 6 s gate inside open
                let due = last_attempt
                    .map(|t| now.duration_since(t) >= DEVICE_RECONNECT)
                    .unwrap_or(true);
                if due && source != SourceType::Pps {
                    self.try_open(idx).await;
                }
            }
        }
    }

    // ── The loop ──────────────────────────────────────────────────────────

    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        let mut tick = tokio::time::interval(DISPATCH_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if SIGNALLED.load(Ordering::Relaxed) {
                break;
            }
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(Event::NewClient(stream, addr)) => self.accept_client(stream, addr),
                        Some(Event::ClientLine { id, line }) => self.handle_client_line(id, &line),
                        Some(Event::ClientGone { id }) => self.detach_subscriber(id, "disconnect"),
                        Some(Event::DeviceRead { idx, outcome }) => self.handle_device_read(idx, outcome),
                        Some(Event::DeviceGone { idx }) => {
                            if self.devices[idx].as_ref().map(|e| e.open).unwrap_or(false) {
                                self.close_device(idx, "reader exited");
                            }
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => self.on_tick().await,
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let uptime = (Utc::now() - self.start_time).num_seconds();
        info!(uptime_s = uptime, "dispatcher shutting down");
        for idx in 0..self.devices.len() {
            if self.devices[idx].is_some() {
                self.close_device(idx, "shutdown");
            }
        }
        for id in 0..self.subscribers.len() {
            if self.subscribers[id].is_some() {
                self.detach_subscriber(id, "shutdown");
            }
        }
        self.pps_threads.clear();
    }
}

// ── Reader tasks ──────────────────────────────────────────────────────────────

/// Spawn the task owning a device descriptor: reads feed the dispatcher,
/// correction writes and baud changes come back in.
fn spawn_reader(
    idx: usize,
    handle: DeviceHandle,
    events: mpsc::Sender<Event>,
    mut corrections: mpsc::Receiver<Vec<u8>>,
    mut baud: watch::Receiver<u32>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        match handle {
            DeviceHandle::Tcp(stream) => {
                let (mut rd, mut wr) = stream.into_split();
                loop {
                    tokio::select! {
                        res = rd.read(&mut buf) => {
                            if !forward_read(&events, idx, res, &buf).await {
                                break;
                            }
                        }
                        Some(bytes) = corrections.recv() => {
                            let _ = wr.write_all(&bytes).await;
                        }
                    }
                }
            }
            DeviceHandle::Udp(sock) => loop {
                match sock.recv_from(&mut buf).await {
                    Ok((n, _peer)) => {
                        if events
                            .send(Event::DeviceRead { idx, outcome: ReadOutcome::Data(buf[..n].to_vec()) })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = events.send(Event::DeviceRead { idx, outcome: ReadOutcome::Error(err) }).await;
                        break;
                    }
                }
            },
            DeviceHandle::Serial(mut serial) => loop {
                tokio::select! {
                    res = serial.read(&mut buf) => {
                        if !forward_read(&events, idx, res, &buf).await {
                            break;
                        }
                    }
                    Some(bytes) = corrections.recv() => {
                        let _ = serial.write_all(&bytes).await;
                    }
                    changed = baud.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let rate = *baud.borrow_and_update();
                        if rate > 0 {
                            use tokio_serial::SerialPort;
                            if let Err(err) = serial.set_baud_rate(rate) {
                                warn!(%err, rate, "baud change failed");
                            }
                        }
                    }
                }
            },
            DeviceHandle::File(mut file) => loop {
                let res = file.read(&mut buf).await;
                if !forward_read(&events, idx, res, &buf).await {
                    break;
                }
                // regular-file reads complete immediately; pace the drain
                tokio::time::sleep(DEVICE_REAWAKE).await;
            },
            DeviceHandle::PpsOnly => {}
        }
        let _ = events.send(Event::DeviceGone { idx }).await;
    })
}

async fn forward_read(
    events: &mpsc::Sender<Event>,
    idx: usize,
    res: std::io::Result<usize>,
    buf: &[u8],
) -> bool {
    let outcome = match res {
        Ok(0) => {
            let _ = events.send(Event::DeviceRead { idx, outcome: ReadOutcome::Eof }).await;
            return false;
        }
        Ok(n) => ReadOutcome::Data(buf[..n].to_vec()),
        Err(err) => {
            let fatal = !matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted);
            let _ = events.send(Event::DeviceRead { idx, outcome: ReadOutcome::Error(err) }).await;
            return !fatal;
        }
    };
    events.send(Event::DeviceRead { idx, outcome }).await.is_ok()
}

// ── Listeners ─────────────────────────────────────────────────────────────────

/// Accept loop for one listening socket; a bounded-table reject happens in
/// the dispatcher so the count stays consistent.
pub async fn accept_loop(listener: TcpListener, events: mpsc::Sender<Event>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if events.send(Event::NewClient(stream, addr)).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(%err, "accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
