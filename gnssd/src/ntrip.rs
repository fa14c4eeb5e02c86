//! # ntrip
//!
//! NTRIP caster client: the connection sub-state machine and the HTTP
//! exchange around the RTCM stream.
//!
//! Connection states run INIT → SENT_GET → ESTABLISHED, dropping to ERR or
//! CLOSED on failure; a reconnect attempt is gated to once per 6 s. The
//! session owns the socket; this module owns the request formatting and
//! response-header parsing, and tells the session whether to arm the
//! lexer's chunked-transfer unwrapping.

use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use crate::config::NTRIP_RECONNECT;
use crate::uri::NtripSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtripState {
    Init,
    /// Sourcetable probe sent (no credentials yet).
    SentProbe,
    /// Mountpoint GET sent, waiting on the response header.
    SentGet,
    /// Response accepted; RTCM flowing.
    Established,
    Error,
    Closed,
}

/// Outcome of feeding response bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum NtripResponse {
    /// Header incomplete, keep reading.
    Pending,
    /// Stream accepted; true when the caster answers with chunked
    /// transfer coding.
    Accepted { chunked: bool },
    /// Caster refused the mountpoint or the credentials.
    Refused(String),
}

#[derive(Debug)]
pub struct NtripSession {
    pub state: NtripState,
    spec: NtripSpec,
    last_attempt: Option<Instant>,
    header: Vec<u8>,
}

impl NtripSession {
    pub fn new(spec: NtripSpec) -> Self {
        Self {
            state: NtripState::Init,
            spec,
            last_attempt: None,
            header: Vec::new(),
        }
    }

    pub fn spec(&self) -> &NtripSpec {
        &self.spec
    }

    /// Reconnect pacing: at most one attempt per gate interval.
    pub fn may_reconnect(&self, now: Instant) -> bool {
        match self.last_attempt {
            Some(t) => now.duration_since(t) >= NTRIP_RECONNECT,
            None => true,
        }
    }

    pub fn mark_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.header.clear();
        self.state = NtripState::SentGet;
    }

    pub fn close(&mut self) {
        self.state = NtripState::Closed;
        self.header.clear();
    }

    /// The mountpoint request, HTTP/1.1 with NTRIP headers and Basic auth
    /// from the URI userinfo.
    pub fn request(&self) -> String {
        let mut req = format!(
            "GET /{} HTTP/1.1\r\nHost: {}:{}\r\nNtrip-Version: Ntrip/2.0\r\nUser-Agent: NTRIP gnssd/{}\r\nConnection: close\r\n",
            self.spec.mountpoint,
            self.spec.host,
            self.spec.port,
            env!("CARGO_PKG_VERSION"),
        );
        if let Some(user) = &self.spec.username {
            let creds = format!("{}:{}", user, self.spec.password.as_deref().unwrap_or(""));
            req.push_str(&format!("Authorization: Basic {}\r\n", BASE64.encode(creds.as_bytes())));
        }
        req.push_str("\r\n");
        req
    }

    /// Feed response bytes until the header terminator; classify the
    /// status line and sniff the transfer coding.
    ///
    /// Returns any stream bytes that arrived after the header so the
    /// caller can feed them straight to the lexer.
    pub fn feed_response(&mut self, data: &[u8]) -> (NtripResponse, Vec<u8>) {
        if self.state != NtripState::SentGet {
            return (NtripResponse::Pending, Vec::new());
        }
        self.header.extend_from_slice(data);
        let end = match find_header_end(&self.header) {
            Some(e) => e,
            None => {
                if self.header.len() > 16 * 1024 {
                    self.state = NtripState::Error;
                    return (NtripResponse::Refused("oversized response header".into()), Vec::new());
                }
                return (NtripResponse::Pending, Vec::new());
            }
        };
        let rest = self.header[end..].to_vec();
        let head = String::from_utf8_lossy(&self.header[..end]).into_owned();
        let status = head.lines().next().unwrap_or("");
        // NTRIP 1 answers "ICY 200 OK", NTRIP 2 a plain HTTP status
        let ok = status.contains("200");
        if !ok {
            warn!(%status, mountpoint = %self.spec.mountpoint, "caster refused stream");
            self.state = NtripState::Error;
            return (NtripResponse::Refused(status.to_string()), Vec::new());
        }
        let chunked = head
            .lines()
            .any(|l| l.to_ascii_lowercase().starts_with("transfer-encoding") && l.to_ascii_lowercase().contains("chunked"));
        debug!(mountpoint = %self.spec.mountpoint, chunked, "ntrip stream established");
        self.state = NtripState::Established;
        self.header.clear();
        (NtripResponse::Accepted { chunked }, rest)
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
