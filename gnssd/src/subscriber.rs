//! # subscriber
//!
//! Subscriber table entries: per-client watch policy, the bounded write
//! channel that stands between the dispatcher and the socket, and the
//! request-line reader.
//!
//! Writes never block the dispatcher: each subscriber has a writer task
//! draining a bounded channel. A full channel is tolerated while the
//! client is live and recently active; a client that stays wedged past
//! the no-read timeout is disconnected.

use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::NOREAD_TIMEOUT;

/// Outstanding lines a slow client may queue before back-pressure.
const WRITE_QUEUE: usize = 128;

// ── Watch policy ──────────────────────────────────────────────────────────────

/// Per-client reporting policy, consumed from `?WATCH={...}` as read-only
/// input. The full command grammar lives with the client-policy parser;
/// the core only honors these fields.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct WatchPolicy {
    pub enable: bool,
    pub json: bool,
    pub nmea: bool,
    /// 0 = none, 1 = textual verbatim + binary hex, 2 = everything verbatim.
    pub raw: u8,
    pub scaled: bool,
    pub split24: bool,
    /// Device path filter; None watches every device.
    pub device: Option<String>,
}

impl WatchPolicy {
    pub fn watching(&self, device_path: &str) -> bool {
        self.enable
            && match &self.device {
                Some(want) => want == device_path,
                None => true,
            }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// The request surface the dispatcher reacts to.
#[derive(Debug, PartialEq)]
pub enum Request {
    Watch(Option<serde_json::Value>),
    Devices,
    Poll,
    Version,
    Unknown(String),
}

/// Split one input line into `?COMMAND;`-style requests.
pub fn parse_requests(line: &str) -> Vec<Request> {
    let mut out = Vec::new();
    for chunk in line.split(';') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let Some(cmd) = chunk.strip_prefix('?') else {
            out.push(Request::Unknown(chunk.to_string()));
            continue;
        };
        if let Some(rest) = cmd.strip_prefix("WATCH") {
            let body = rest.trim_start_matches('=');
            let value = if body.is_empty() { None } else { serde_json::from_str(body).ok() };
            out.push(Request::Watch(value));
        } else if cmd.starts_with("DEVICES") {
            out.push(Request::Devices);
        } else if cmd.starts_with("POLL") {
            out.push(Request::Poll);
        } else if cmd.starts_with("VERSION") {
            out.push(Request::Version);
        } else {
            out.push(Request::Unknown(cmd.to_string()));
        }
    }
    out
}

// ── Subscriber entry ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Subscriber {
    pub addr: SocketAddr,
    pub policy: WatchPolicy,
    pub last_activity: Instant,
    tx: mpsc::Sender<Vec<u8>>,
}

impl Subscriber {
    pub fn new(addr: SocketAddr, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            addr,
            policy: WatchPolicy::default(),
            last_activity: Instant::now(),
            tx,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Queue one line for the writer task. `false` means the subscriber
    /// is gone or wedged and should be detached.
    pub fn send(&self, line: Vec<u8>) -> bool {
        match self.tx.try_send(line) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // tolerated until the client has been idle too long
                if self.last_activity.elapsed() > NOREAD_TIMEOUT {
                    info!(addr = %self.addr, "subscriber wedged past no-read timeout");
                    false
                } else {
                    debug!(addr = %self.addr, "subscriber write queue full, dropping line");
                    true
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Create the bounded write channel and its writer task.
pub fn spawn_writer(mut half: OwnedWriteHalf) -> (mpsc::Sender<Vec<u8>>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE);
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if half.write_all(&line).await.is_err() {
                break;
            }
        }
        let _ = half.shutdown().await;
    });
    (tx, handle)
}

/// Read request lines from a subscriber, forwarding each to the
/// dispatcher. Exits on EOF or error.
pub async fn read_requests(
    half: OwnedReadHalf,
    id: usize,
    events: mpsc::Sender<crate::dispatcher::Event>,
) {
    let mut lines = BufReader::new(half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events
                    .send(crate::dispatcher::Event::ClientLine { id, line })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    let _ = events.send(crate::dispatcher::Event::ClientGone { id }).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
