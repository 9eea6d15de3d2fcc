//! # Simulated Hardware
//!
//! Host-side stand-ins for everything the session talks to, used by the
//! unit tests and by the `cannon-sim` binary:
//!
//! - [`ByteFeed`]: scripted byte source/sink for link-level tests
//! - [`SimModule`]: an ESP8266 that understands the AT vocabulary we use
//! - [`SimClock`]: virtual milliseconds, advanced only by delays
//! - [`MemStorage`]: RAM-backed EEPROM
//!
//! Module writes and clock delays are recorded in a shared [`EventLog`] so
//! tests can check the exact order of traffic and pauses.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::{String, ToString};
use std::vec::Vec;

use embedded_io::{ErrorKind, ErrorType, Read, ReadReady, Write};

use crate::traits::{Clock, NvStorage};

/// One observable action on the simulated hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Bytes handed to the module in a single write call
    Wrote(Vec<u8>),
    /// A blocking delay of the given length
    Delay(u32),
}

/// Shared, ordered record of [`SimEvent`]s
pub type EventLog = Rc<RefCell<Vec<SimEvent>>>;

/// Create an empty event log
pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Virtual clock; time only moves when someone delays
#[derive(Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
    log: Option<EventLog>,
}

impl SimClock {
    /// Clock starting at zero, not recording delays
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock that records every delay into `log`
    pub fn with_log(log: EventLog) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            log: Some(log),
        }
    }

    /// Jump the clock forward without recording a delay
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(u64::from(ms));
        if let Some(log) = &self.log {
            log.borrow_mut().push(SimEvent::Delay(ms));
        }
    }
}

// ---------------------------------------------------------------------------
// Byte feed
// ---------------------------------------------------------------------------

/// Minimal scripted transport
///
/// Bytes pushed with [`ByteFeed::push`] become readable; a reply registered
/// with [`ByteFeed::reply_to`] is queued whenever the written stream ends
/// with its trigger.
#[derive(Default)]
pub struct ByteFeed {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    replies: Vec<(Vec<u8>, Vec<u8>)>,
}

impl ByteFeed {
    /// Empty feed with no scripted replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `bytes` readable
    pub fn push(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Queue `reply` each time the written stream ends with `trigger`
    pub fn reply_to(&mut self, trigger: &[u8], reply: &[u8]) {
        self.replies.push((trigger.to_vec(), reply.to_vec()));
    }

    /// Everything written so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Bytes still waiting to be read
    pub fn remaining(&self) -> usize {
        self.rx.len()
    }
}

impl ErrorType for ByteFeed {
    type Error = ErrorKind;
}

impl Read for ByteFeed {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl ReadReady for ByteFeed {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl Write for ByteFeed {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.extend_from_slice(buf);
        let mut queued = Vec::new();
        for (trigger, reply) in &self.replies {
            if self.written.ends_with(trigger) {
                queued.extend_from_slice(reply);
            }
        }
        self.rx.extend(queued);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ESP8266 module
// ---------------------------------------------------------------------------

struct ModuleState {
    rx: VecDeque<u8>,
    command: Vec<u8>,
    log: EventLog,

    // Device settings
    mode: u8,
    joined: Option<String>,
    mux: u8,
    server_port: Option<u16>,
    max_conn: u8,
    ip: String,
    mac: String,

    // Scripted behavior
    networks: Vec<(String, String)>,
    scan: Vec<String>,
    ignored_probes: u32,
    failed_joins: u32,
    silent_close: bool,

    // Pending CIPSEND payload: (channel, bytes still expected, bytes so far)
    payload: Option<(u8, usize, Vec<u8>)>,

    // Observations
    commands: Vec<String>,
    sends: Vec<(u8, Vec<u8>)>,
    closed: Vec<u8>,
}

impl ModuleState {
    fn reply(&mut self, text: &str) {
        self.rx.extend(text.bytes());
    }

    fn ingest(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if let Some((channel, expected, mut data)) = self.payload.take() {
                data.push(byte);
                if data.len() < expected {
                    self.payload = Some((channel, expected, data));
                } else {
                    let text = format!("\r\nRecv {} bytes\r\n\r\nSEND OK\r\n", data.len());
                    self.sends.push((channel, data));
                    self.reply(&text);
                }
                continue;
            }

            self.command.push(byte);
            if self.command.ends_with(b"\r\n") {
                let line = String::from_utf8_lossy(&self.command[..self.command.len() - 2])
                    .to_string();
                self.command.clear();
                if !line.is_empty() {
                    self.commands.push(line.clone());
                    self.respond(&line);
                }
            }
        }
    }

    fn respond(&mut self, line: &str) {
        match line {
            "AT" => {
                if self.ignored_probes > 0 {
                    self.ignored_probes -= 1;
                } else {
                    self.reply("\r\nOK\r\n");
                }
            }
            "AT+CWMODE?" => {
                let text = format!("+CWMODE:{}\r\n\r\nOK\r\n", self.mode);
                self.reply(&text);
            }
            "AT+CWJAP?" | "AT+CWJAP_CUR?" => {
                let tag = &line[3..line.len() - 1];
                let text = match &self.joined {
                    Some(ssid) => format!(
                        "{}:\"{}\",\"aa:bb:cc:dd:ee:ff\",6,-52\r\n\r\nOK\r\n",
                        tag,
                        escape(ssid)
                    ),
                    None => "No AP\r\n\r\nOK\r\n".to_string(),
                };
                self.reply(&text);
            }
            "AT+CIPMUX?" => {
                let text = format!("+CIPMUX:{}\r\n\r\nOK\r\n", self.mux);
                self.reply(&text);
            }
            "AT+CIFSR" => {
                let text = format!(
                    "+CIFSR:STAIP,\"{}\"\r\n+CIFSR:STAMAC,\"{}\"\r\n\r\nOK\r\n",
                    self.ip, self.mac
                );
                self.reply(&text);
            }
            "AT+CWLAP" => {
                let mut text = String::new();
                for ssid in &self.scan {
                    text.push_str(&format!("+CWLAP:(\"{}\")\r\n", ssid));
                }
                text.push_str("\r\nOK\r\n");
                self.reply(&text);
            }
            _ => self.respond_set(line),
        }
    }

    fn respond_set(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("AT+CWMODE=") {
            match value.parse::<u8>() {
                Ok(mode @ 1..=3) => {
                    self.mode = mode;
                    self.reply("\r\nOK\r\n");
                }
                _ => self.reply("\r\nERROR\r\n"),
            }
        } else if let Some(args) = line.strip_prefix("AT+CWJAP=") {
            let mut parts = quoted_args(args).into_iter();
            let ssid = parts.next().unwrap_or_default();
            let password = parts.next().unwrap_or_default();
            let known = self
                .networks
                .iter()
                .any(|(s, p)| *s == ssid && *p == password);
            if known && self.failed_joins == 0 {
                self.joined = Some(ssid);
                self.reply("WIFI CONNECTED\r\nWIFI GOT IP\r\n\r\nOK\r\n");
            } else {
                self.failed_joins = self.failed_joins.saturating_sub(1);
                self.joined = None;
                self.reply("+CWJAP:3\r\n\r\nFAIL\r\n");
            }
        } else if line == "AT+CIPMUX=1" {
            self.mux = 1;
            self.reply("\r\nOK\r\n");
        } else if let Some(port) = line.strip_prefix("AT+CIPSERVER=1,") {
            match (self.mux, port.parse::<u16>()) {
                (1, Ok(port)) => {
                    let text = if self.server_port == Some(port) {
                        "no change\r\n\r\nOK\r\n"
                    } else {
                        "\r\nOK\r\n"
                    };
                    self.server_port = Some(port);
                    self.reply(text);
                }
                _ => self.reply("\r\nERROR\r\n"),
            }
        } else if let Some(n) = line.strip_prefix("AT+CIPSERVERMAXCONN=") {
            match n.parse::<u8>() {
                Ok(n @ 1..=5) if self.server_port.is_some() => {
                    self.max_conn = n;
                    self.reply("\r\nOK\r\n");
                }
                _ => self.reply("\r\nERROR\r\n"),
            }
        } else if let Some(args) = line.strip_prefix("AT+CIPSEND=") {
            let mut parts = args.splitn(2, ',');
            let channel = parts.next().and_then(|c| c.parse::<u8>().ok());
            let len = parts.next().and_then(|l| l.parse::<usize>().ok());
            match (channel, len) {
                (Some(channel), Some(len)) if len > 0 => {
                    self.payload = Some((channel, len, Vec::new()));
                    self.reply("\r\nOK\r\n> ");
                }
                _ => self.reply("\r\nERROR\r\n"),
            }
        } else if let Some(channel) = line.strip_prefix("AT+CIPCLOSE=") {
            match channel.parse::<u8>() {
                Ok(channel) => {
                    self.closed.push(channel);
                    if !self.silent_close {
                        let text = format!("{},CLOSED\r\n\r\nOK\r\n", channel);
                        self.reply(&text);
                    }
                }
                Err(_) => self.reply("\r\nERROR\r\n"),
            }
        } else if line.starts_with("AT+CWLAPOPT=") {
            self.reply("\r\nOK\r\n");
        } else {
            self.reply("\r\nERROR\r\n");
        }
    }
}

/// Split `"a","b"` command arguments, undoing backslash escapes
fn quoted_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = args.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            '"' => {}
            ',' => out.push(core::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    out.push(current);
    out
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | ',' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Scripted ESP8266 speaking the AT dialect the session uses
///
/// Cloning yields another handle to the same module, so a test can keep
/// one handle for inspection while the session owns the other.
#[derive(Clone)]
pub struct SimModule {
    state: Rc<RefCell<ModuleState>>,
}

impl SimModule {
    /// Factory-fresh module: soft-AP mode, not joined, mux off
    pub fn new(log: EventLog) -> Self {
        Self {
            state: Rc::new(RefCell::new(ModuleState {
                rx: VecDeque::new(),
                command: Vec::new(),
                log,
                mode: 2,
                joined: None,
                mux: 0,
                server_port: None,
                max_conn: 5,
                ip: "192.168.1.42".to_string(),
                mac: "5c:cf:7f:12:34:56".to_string(),
                networks: Vec::new(),
                scan: Vec::new(),
                ignored_probes: 0,
                failed_joins: 0,
                silent_close: false,
                payload: None,
                commands: Vec::new(),
                sends: Vec::new(),
                closed: Vec::new(),
            })),
        }
    }

    /// Module already configured as a station on `ssid` with a mux server
    pub fn configured(log: EventLog, ssid: &str, password: &str, port: u16) -> Self {
        let module = Self::new(log).with_network(ssid, password);
        {
            let mut state = module.state.borrow_mut();
            state.mode = 1;
            state.joined = Some(ssid.to_string());
            state.mux = 1;
            state.server_port = Some(port);
        }
        module
    }

    /// Add an access point the module can join
    pub fn with_network(self, ssid: &str, password: &str) -> Self {
        self.state
            .borrow_mut()
            .networks
            .push((ssid.to_string(), password.to_string()));
        self
    }

    /// Access points reported by a scan
    pub fn with_scan(self, ssids: &[&str]) -> Self {
        self.state.borrow_mut().scan = ssids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Stay silent for the first `n` `AT` probes
    pub fn ignore_probes(self, n: u32) -> Self {
        self.state.borrow_mut().ignored_probes = n;
        self
    }

    /// Reject the next `n` join attempts even with valid credentials
    pub fn fail_joins(self, n: u32) -> Self {
        self.state.borrow_mut().failed_joins = n;
        self
    }

    /// Never acknowledge `AT+CIPCLOSE`
    pub fn silent_close(self) -> Self {
        self.state.borrow_mut().silent_close = true;
        self
    }

    /// Queue unsolicited output, e.g. an `+IPD` notification
    pub fn inject(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Command lines received, in order, without CRLF
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Payloads delivered through `AT+CIPSEND`, per channel
    pub fn sends(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.borrow().sends.clone()
    }

    /// Channels closed through `AT+CIPCLOSE`
    pub fn closed(&self) -> Vec<u8> {
        self.state.borrow().closed.clone()
    }

    /// Current Wi-Fi mode
    pub fn mode(&self) -> u8 {
        self.state.borrow().mode
    }

    /// Network the module is associated with
    pub fn joined(&self) -> Option<String> {
        self.state.borrow().joined.clone()
    }

    /// Current multiplexing setting
    pub fn mux(&self) -> u8 {
        self.state.borrow().mux
    }

    /// Port of the running server
    pub fn server_port(&self) -> Option<u16> {
        self.state.borrow().server_port
    }

    /// Configured maximum server connections
    pub fn max_conn(&self) -> u8 {
        self.state.borrow().max_conn
    }
}

impl ErrorType for SimModule {
    type Error = ErrorKind;
}

impl Read for SimModule {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            match state.rx.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl ReadReady for SimModule {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.state.borrow().rx.is_empty())
    }
}

impl Write for SimModule {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        state.log.borrow_mut().push(SimEvent::Wrote(buf.to_vec()));
        state.ingest(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Errors from [`MemStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemStorageError {
    /// Access past the end of the device
    OutOfRange,
}

/// RAM-backed EEPROM, erased to `0xFF`
#[derive(Clone)]
pub struct MemStorage {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl MemStorage {
    /// Erased device of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(std::vec![0xFF; size])),
        }
    }

    /// Snapshot of the whole device
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }
}

impl NvStorage for MemStorage {
    type Error = MemStorageError;

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        let bytes = self.bytes.borrow();
        let src = bytes
            .get(offset..offset + buf.len())
            .ok_or(MemStorageError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        let mut bytes = self.bytes.borrow_mut();
        let dst = bytes
            .get_mut(offset..offset + data.len())
            .ok_or(MemStorageError::OutOfRange)?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

/// Drop the per-poll pauses from an event list, keeping writes and the
/// deliberate protocol delays
pub fn without_polls(events: &[SimEvent], poll_ms: u32) -> Vec<SimEvent> {
    events
        .iter()
        .filter(|event| **event != SimEvent::Delay(poll_ms))
        .cloned()
        .collect()
}
