//! # Module Session
//!
//! Owns the link to the ESP8266 and everything that happens over it:
//!
//! 1. **Bring-up**: a retry-forever state machine that puts the module in
//!    station mode, joins the configured network, enables multiplexing and
//!    starts the TCP server
//! 2. **Request polling**: spots `+IPD,<channel>` notifications and records
//!    the active channel
//! 3. **Delivery**: assembles `HTTP/1.1 200 OK` responses as fragment lists
//!    and drains them through `AT+CIPSEND`, then closes the channel
//!
//! ## Setup State Machine
//!
//! ```text
//! Uninitialized ─► ProbingDevice ─► ConfiguringMode ─► JoiningNetwork
//!                                                           │
//!                 Ready ◄─ ServerListening ◄─ EnablingMultiplex
//! ```
//!
//! Each stage first asks whether the setting is already right and only then
//! issues the imperative form. A failed stage is retried after a fixed
//! delay, forever; progress is only visible through the log and through
//! [`SetupProgress`] when the caller drives [`Session::step_setup`] itself.

use embedded_io::{Read, ReadReady, Write};
use heapless::Vec;

use crate::at;
use crate::config::{ConfigStore, NetworkConfig, ServerConfig};
use crate::http;
use crate::line::contains;
use crate::link::{printable, Link};
use crate::prefetch::{self, Field, PrefetchReport, StatusValues};
use crate::queue::{Fragment, OutputQueue};
use crate::request::Route;
use crate::traits::{flat_rom_read, Clock, LinkResult, NvStorage, RomReader};
use crate::{MAX_OUTPUT_FRAGMENTS, PREFETCH_CAPACITY};

/// Maximum number of SSIDs kept from a scan
pub const MAX_SCAN_RESULTS: usize = 8;

/// Stages of module bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetupState {
    /// Nothing sent yet
    Uninitialized,
    /// Waiting for the module to answer `AT`
    ProbingDevice,
    /// Ensuring station mode
    ConfiguringMode,
    /// Ensuring association with the configured access point
    JoiningNetwork,
    /// Ensuring connection multiplexing
    EnablingMultiplex,
    /// Starting the TCP server
    ServerListening,
    /// Accepting requests
    Ready,
}

/// Result of one [`Session::step_setup`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetupProgress {
    /// The stage completed; the session is now in this state
    Advanced(SetupState),
    /// The stage failed and will be retried from this state
    Retrying(SetupState),
}

/// Delays and timeouts used by the session, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// Pause between empty polls inside timed waits
    pub poll_interval_ms: u32,
    /// Pause between unanswered `AT` probes
    pub probe_retry_ms: u32,
    /// Pause before retrying a failed setup stage or settings attempt
    pub stage_retry_ms: u32,
    /// Timeout for ordinary commands
    pub command_timeout_ms: u32,
    /// Timeout for joining, multiplexing and server commands
    pub long_timeout_ms: u32,
    /// Pause after `AT+CIPSEND` before writing the payload
    pub send_settle_ms: u32,
    /// Pause after the payload before `AT+CIPCLOSE`
    pub close_settle_ms: u32,
    /// How long to wait for the value line of a settings request
    pub settings_wait_ms: u32,
    /// Join attempts made for a settings request
    pub settings_attempts: u8,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1,
            probe_retry_ms: 100,
            stage_retry_ms: 500,
            command_timeout_ms: 2000,
            long_timeout_ms: 10000,
            send_settle_ms: 20,
            // The module needs at least a second before it accepts the close
            close_settle_ms: 1000,
            settings_wait_ms: 2000,
            settings_attempts: 3,
        }
    }
}

/// Configuration for a [`Session`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delays and timeouts
    pub timing: Timing,
    /// TCP server settings
    pub server: ServerConfig,
}

/// Outcome of delivering one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeliveryReport {
    /// Channel the response went out on
    pub channel: u8,
    /// Payload length announced with `AT+CIPSEND`
    pub bytes: usize,
    /// Whether `AT+CIPCLOSE` was acknowledged
    pub closed: bool,
    /// Fragments the output queue rejected while the response was assembled
    pub dropped_fragments: usize,
}

/// An inbound request notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Inbound {
    /// Channel the data arrived on
    pub channel: u8,
    /// What the request asks for
    pub route: Route,
}

/// The ESP8266 as seen by the application
pub struct Session<T, C, S> {
    pub(crate) link: Link<T, C>,
    pub(crate) store: ConfigStore<S>,
    pub(crate) network: NetworkConfig,
    pub(crate) server: ServerConfig,
    pub(crate) timing: Timing,
    state: SetupState,
    active_channel: Option<u8>,
    rom: RomReader,
}

impl<T, C, S> Session<T, C, S>
where
    T: Read + Write + ReadReady,
    C: Clock,
    S: NvStorage,
{
    /// Create a session; the network settings come from `storage` or the
    /// compiled defaults
    pub fn new(port: T, clock: C, storage: S, config: SessionConfig) -> Self {
        let mut store = ConfigStore::new(storage);
        let network = store.load_or_default();
        Self {
            link: Link::new(port, clock, config.timing.poll_interval_ms),
            store,
            network,
            server: config.server,
            timing: config.timing,
            state: SetupState::Uninitialized,
            active_channel: None,
            rom: flat_rom_read,
        }
    }

    /// Use a platform-specific accessor for program-memory fragments
    pub fn with_rom_reader(mut self, rom: RomReader) -> Self {
        self.rom = rom;
        self
    }

    /// Current setup stage
    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Check if the session accepts requests
    pub fn is_ready(&self) -> bool {
        self.state == SetupState::Ready
    }

    /// Channel of the most recent inbound notification
    pub fn active_channel(&self) -> Option<u8> {
        self.active_channel
    }

    /// Network settings in use
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Replace the network settings for the next bring-up (not persisted)
    pub fn set_network(&mut self, network: NetworkConfig) {
        self.network = network;
    }

    /// Server settings in use
    pub fn server(&self) -> ServerConfig {
        self.server
    }

    /// Drop back to the join stage after the module left the network
    ///
    /// Requests are ignored until [`Session::bring_up`] or
    /// [`Session::step_setup`] has rejoined the configured network.
    pub(crate) fn require_rejoin(&mut self) {
        log::warn!("esp8266: not on '{}', setup resumes at the join stage", self.network.ssid);
        self.state = SetupState::JoiningNetwork;
    }

    /// Access the link (used by tests and simulators)
    pub fn link_mut(&mut self) -> &mut Link<T, C> {
        &mut self.link
    }

    // -----------------------------------------------------------------------
    // Bring-up
    // -----------------------------------------------------------------------

    /// Run setup stages until the module is ready; never gives up
    pub fn bring_up(&mut self) {
        log::info!("esp8266: bringing up module");
        while !self.is_ready() {
            self.step_setup();
        }
    }

    /// Attempt the current setup stage once
    pub fn step_setup(&mut self) -> SetupProgress {
        let state = self.state;
        let done = match state {
            SetupState::Uninitialized => true,
            SetupState::ProbingDevice => self.probe(),
            SetupState::ConfiguringMode => self.ensure(
                at::QUERY_MODE,
                at::mode_reply(at::STATION_MODE).as_bytes(),
                at::set_mode(at::STATION_MODE).as_bytes(),
                self.timing.command_timeout_ms,
            ),
            SetupState::JoiningNetwork => {
                let query = at::joined_reply(&self.network.ssid);
                let join = at::join(&self.network.ssid, &self.network.password);
                self.ensure(
                    at::QUERY_JOINED,
                    query.as_bytes(),
                    join.as_bytes(),
                    self.timing.long_timeout_ms,
                )
            }
            SetupState::EnablingMultiplex => self.ensure(
                at::QUERY_MUX,
                at::MUX_ON,
                at::ENABLE_MUX,
                self.timing.long_timeout_ms,
            ),
            SetupState::ServerListening => self.start_server(),
            SetupState::Ready => return SetupProgress::Advanced(SetupState::Ready),
        };

        if !done {
            if state != SetupState::ProbingDevice {
                log::warn!("esp8266: {:?} failed, retrying", state);
                self.link.delay_ms(self.timing.stage_retry_ms);
            }
            return SetupProgress::Retrying(state);
        }

        self.state = next_state(state);
        log::info!("esp8266: {:?} [OK]", state);
        if self.state == SetupState::Ready {
            if let Err(e) = self.refresh_addresses() {
                log::warn!("esp8266: could not read station addresses: {}", e);
            }
            log::info!(
                "esp8266: ready on port {} (ip {})",
                self.server.port,
                self.network.ip
            );
        }
        SetupProgress::Advanced(self.state)
    }

    fn probe(&mut self) -> bool {
        let ok = self
            .link
            .execute(at::PROBE, at::OK, self.timing.command_timeout_ms)
            .is_ok();
        if !ok {
            log::debug!("esp8266: waiting for a response from the module");
            self.link.delay_ms(self.timing.probe_retry_ms);
        }
        ok
    }

    /// Query form first, imperative form with `set_timeout` if needed
    fn ensure(&mut self, query: &[u8], expected: &[u8], set: &[u8], set_timeout: u32) -> bool {
        if self
            .link
            .execute(query, expected, self.timing.command_timeout_ms)
            .is_ok()
        {
            return true;
        }
        log::info!("esp8266: changing setting: {}", printable(set));
        self.link.execute(set, at::OK, set_timeout).is_ok()
    }

    fn start_server(&mut self) -> bool {
        let start = at::start_server(self.server.port);
        if self
            .link
            .execute(start.as_bytes(), at::OK, self.timing.long_timeout_ms)
            .is_err()
        {
            return false;
        }
        let limit = at::max_connections(self.server.max_connections);
        self.link
            .execute(limit.as_bytes(), at::OK, self.timing.command_timeout_ms)
            .is_ok()
    }

    // -----------------------------------------------------------------------
    // Module queries
    // -----------------------------------------------------------------------

    /// Read the station IP and MAC into the cached network settings
    pub fn refresh_addresses(&mut self) -> LinkResult<bool> {
        let network = &mut self.network;
        self.link.collect_response(
            at::QUERY_ADDRESSES,
            self.timing.command_timeout_ms,
            |line| {
                if let Some(ip) = at::parse_quoted(line, b"STAIP,") {
                    if network.set_ip(text(ip)).is_err() {
                        log::warn!("esp8266: station ip too long");
                    }
                } else if let Some(mac) = at::parse_quoted(line, b"STAMAC,") {
                    if network.set_mac(text(mac)).is_err() {
                        log::warn!("esp8266: station mac too long");
                    }
                }
            },
        )
    }

    /// List the access points in range
    pub fn scan_networks(
        &mut self,
    ) -> LinkResult<Vec<heapless::String<{ crate::config::SSID_CAPACITY }>, MAX_SCAN_RESULTS>> {
        if self
            .link
            .execute(at::SCAN_OPTIONS, at::OK, self.timing.command_timeout_ms)
            .is_err()
        {
            log::warn!("esp8266: scan options not accepted");
        }

        let mut found = Vec::new();
        self.link
            .collect_response(at::SCAN, self.timing.long_timeout_ms, |line| {
                let Some(ssid) = at::parse_quoted(line, b"+CWLAP:") else {
                    return;
                };
                let mut name = heapless::String::new();
                let fits = core::str::from_utf8(ssid)
                    .ok()
                    .map(|s| name.push_str(s).is_ok())
                    .unwrap_or(false);
                if !fits || found.push(name).is_err() {
                    log::warn!("esp8266: dropping scan entry");
                }
            })?;
        Ok(found)
    }

    /// Ask the module whether it is associated with an access point
    pub fn is_connected(&mut self) -> bool {
        self.link
            .execute(
                at::QUERY_JOINED_CURRENT,
                at::JOINED_CURRENT,
                self.timing.command_timeout_ms,
            )
            .is_ok()
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Check for one inbound request notification without blocking
    pub fn poll(&mut self) -> LinkResult<Option<Inbound>> {
        if !self.is_ready() {
            return Ok(None);
        }
        if !self.link.try_read_line()? {
            return Ok(None);
        }
        let line = self.link.line();
        if !contains(line, at::INBOUND_MARKER) {
            return Ok(None);
        }
        match at::parse_channel(line) {
            Some(channel) => {
                let route = Route::parse(line);
                log::info!("esp8266: request on channel {}: {:?}", channel, route);
                self.active_channel = Some(channel);
                Ok(Some(Inbound { channel, route }))
            }
            None => {
                log::warn!("esp8266: malformed notification '{}'", printable(line));
                Ok(None)
            }
        }
    }

    /// Read one line and report whether it contains `matchtext`
    pub fn check_for_request(&mut self, matchtext: &[u8]) -> LinkResult<bool> {
        Ok(self.link.try_read_line()? && contains(self.link.line(), matchtext))
    }

    /// Most recently received line
    pub fn last_line(&self) -> &[u8] {
        self.link.line()
    }

    // -----------------------------------------------------------------------
    // Responses
    // -----------------------------------------------------------------------

    /// Send `200 OK` with `body` on `channel`, then close it
    pub fn send_http_200_static(
        &mut self,
        channel: u8,
        body: Fragment<'_>,
    ) -> LinkResult<DeliveryReport> {
        let mut queue = OutputQueue::<MAX_OUTPUT_FRAGMENTS>::new();
        let dropped = enqueue(&mut queue, &[Fragment::rom(http::STATUS_200), body]);
        let mut report = self.drain(channel, &mut queue)?;
        report.dropped_fragments = dropped;
        Ok(report)
    }

    /// Send `200 OK` with `head`, a rendered list of status values and
    /// `tail`, then close the channel
    pub fn send_http_200_with_prefetch(
        &mut self,
        channel: u8,
        head: Fragment<'_>,
        tail: Fragment<'_>,
        fields: &[&str],
    ) -> LinkResult<(DeliveryReport, PrefetchReport)> {
        let connected = fields
            .iter()
            .any(|name| Field::from_name(name) == Some(Field::Connected))
            && self.is_connected();

        let mut scratch = Vec::<u8, PREFETCH_CAPACITY>::new();
        let values = StatusValues {
            ssid: &self.network.ssid,
            connected,
            ip: &self.network.ip,
            mac: &self.network.mac,
            port: self.server.port,
        };
        let prefetched = prefetch::render(fields, &values, &mut scratch);

        let mut queue = OutputQueue::<MAX_OUTPUT_FRAGMENTS>::new();
        let dropped = enqueue(
            &mut queue,
            &[Fragment::rom(http::STATUS_200), head, Fragment::ram(&scratch), tail],
        );
        let mut delivered = self.drain(channel, &mut queue)?;
        delivered.dropped_fragments = dropped;
        Ok((delivered, prefetched))
    }

    /// Write every queued fragment to `channel` and close it
    ///
    /// Reply lines that arrive during the settle delay are discarded before
    /// the close; a request notification among them is logged and counted
    /// by [`Link::dropped_requests`].
    pub fn drain<const M: usize>(
        &mut self,
        channel: u8,
        queue: &mut OutputQueue<'_, M>,
    ) -> LinkResult<DeliveryReport> {
        let bytes = queue.total_len();
        log::debug!("esp8266: sending {} bytes on channel {}", bytes, channel);

        self.link.write_all(at::send(channel, bytes).as_bytes())?;
        self.link.delay_ms(self.timing.send_settle_ms);

        while let Some(fragment) = queue.next_fragment() {
            match fragment {
                Fragment::Ram(data) => self.link.write_all(data)?,
                Fragment::Rom(_) => {
                    for index in 0..fragment.len() {
                        self.link.write_byte(fragment.byte_at(index, self.rom))?;
                    }
                }
            }
        }
        self.link.write_all(http::SEND_TERMINATOR)?;
        self.link.flush()?;
        self.link.delay_ms(self.timing.close_settle_ms);

        let closed = self
            .link
            .execute(
                at::close(channel).as_bytes(),
                at::OK,
                self.timing.command_timeout_ms,
            )
            .is_ok();
        if !closed {
            log::warn!("esp8266: channel {} close not acknowledged", channel);
        }
        if self.active_channel == Some(channel) {
            self.active_channel = None;
        }

        Ok(DeliveryReport {
            channel,
            bytes,
            closed,
            dropped_fragments: 0,
        })
    }
}

/// Append `fragments` in order; returns how many the queue rejected
fn enqueue<'a, const M: usize>(
    queue: &mut OutputQueue<'a, M>,
    fragments: &[Fragment<'a>],
) -> usize {
    fragments
        .iter()
        .filter(|fragment| queue.add_fragment(**fragment).is_err())
        .count()
}

fn text(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or("")
}

fn next_state(state: SetupState) -> SetupState {
    match state {
        SetupState::Uninitialized => SetupState::ProbingDevice,
        SetupState::ProbingDevice => SetupState::ConfiguringMode,
        SetupState::ConfiguringMode => SetupState::JoiningNetwork,
        SetupState::JoiningNetwork => SetupState::EnablingMultiplex,
        SetupState::EnablingMultiplex => SetupState::ServerListening,
        SetupState::ServerListening | SetupState::Ready => SetupState::Ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Route;
    use crate::sim::{event_log, without_polls, EventLog, MemStorage, SimClock, SimEvent, SimModule};

    type SimSession = Session<SimModule, SimClock, MemStorage>;

    fn session(module: &SimModule, log: &EventLog) -> SimSession {
        let mut session = Session::new(
            module.clone(),
            SimClock::with_log(log.clone()),
            MemStorage::new(256),
            SessionConfig::default(),
        );
        session.set_network(NetworkConfig::new("leedy", "goat").unwrap());
        session
    }

    fn ready_session(log: &EventLog) -> (SimModule, SimSession) {
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080);
        let mut session = session(&module, log);
        session.bring_up();
        log.borrow_mut().clear();
        (module, session)
    }

    #[test]
    fn test_setup_corrects_every_stage_in_order() {
        let log = event_log();
        let module = SimModule::new(log.clone()).with_network("leedy", "goat");
        let mut session = session(&module, &log);

        session.bring_up();

        assert!(session.is_ready());
        let commands = module.commands();
        let position = |cmd: &str| {
            commands
                .iter()
                .position(|c| c == cmd)
                .unwrap_or_else(|| panic!("{} not sent", cmd))
        };
        let mode = position("AT+CWMODE=1");
        let join = position("AT+CWJAP=\"leedy\",\"goat\"");
        let mux = position("AT+CIPMUX=1");
        let server = position("AT+CIPSERVER=1,8080");
        let limit = position("AT+CIPSERVERMAXCONN=1");
        assert!(position("AT") < mode);
        assert!(mode < join && join < mux && mux < server && server < limit);

        assert_eq!(module.mode(), 1);
        assert_eq!(module.joined().as_deref(), Some("leedy"));
        assert_eq!(module.mux(), 1);
        assert_eq!(module.server_port(), Some(8080));
        assert_eq!(module.max_conn(), 1);
        assert_eq!(session.network().ip.as_str(), "192.168.1.42");
        assert_eq!(session.network().mac.as_str(), "5c:cf:7f:12:34:56");
    }

    #[test]
    fn test_setup_skips_settings_already_correct() {
        let log = event_log();
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080);
        let mut session = session(&module, &log);

        session.bring_up();

        assert!(session.is_ready());
        let commands = module.commands();
        assert!(!commands.iter().any(|c| c.starts_with("AT+CWMODE=")));
        assert!(!commands.iter().any(|c| c.starts_with("AT+CWJAP=")));
        assert!(!commands.iter().any(|c| c == "AT+CIPMUX=1"));
    }

    #[test]
    fn test_setup_retries_until_module_answers() {
        let log = event_log();
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080).ignore_probes(3);
        let mut session = session(&module, &log);

        assert_eq!(session.step_setup(), SetupProgress::Advanced(SetupState::ProbingDevice));
        for _ in 0..3 {
            assert_eq!(
                session.step_setup(),
                SetupProgress::Retrying(SetupState::ProbingDevice)
            );
        }
        assert_eq!(
            session.step_setup(),
            SetupProgress::Advanced(SetupState::ConfiguringMode)
        );
        assert!(log.borrow().contains(&SimEvent::Delay(100)));
    }

    #[test]
    fn test_setup_retries_failed_join() {
        let log = event_log();
        let module = SimModule::new(log.clone())
            .with_network("leedy", "goat")
            .fail_joins(2);
        let mut session = session(&module, &log);

        session.bring_up();

        let joins = module
            .commands()
            .iter()
            .filter(|c| c.starts_with("AT+CWJAP="))
            .count();
        assert_eq!(joins, 3);
        assert!(session.is_ready());
        assert!(log.borrow().contains(&SimEvent::Delay(500)));
    }

    #[test]
    fn test_poll_ignored_until_ready() {
        let log = event_log();
        let module = SimModule::new(log.clone());
        let mut session = session(&module, &log);
        module.inject(b"+IPD,0,18:GET / HTTP/1.1\r\n");

        assert_eq!(session.poll(), Ok(None));
    }

    #[test]
    fn test_poll_records_active_channel() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);

        module.inject(b"0,CONNECT\r\n\r\n+IPD,3,312:GET /config HTTP/1.1\r\nHost: cannon\r\n");
        let mut inbound = None;
        for _ in 0..4 {
            if let Some(request) = session.poll().unwrap() {
                inbound = Some(request);
                break;
            }
        }

        let inbound = inbound.unwrap();
        assert_eq!(inbound.channel, 3);
        assert_eq!(inbound.route, Route::Config);
        assert_eq!(session.active_channel(), Some(3));
    }

    #[test]
    fn test_check_for_request() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);

        module.inject(b"+IPD,0,20:GET / HTTP/1.1\r\n");
        assert_eq!(session.check_for_request(b"GET"), Ok(true));
        module.inject(b"Host: cannon\r\n");
        assert_eq!(session.check_for_request(b"GET"), Ok(false));
        assert_eq!(session.check_for_request(b"GET"), Ok(false));
    }

    #[test]
    fn test_send_static_traffic_order() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);

        let report = session.send_http_200_static(0, Fragment::ram(b"hi")).unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                channel: 0,
                bytes: 21,
                closed: true,
                dropped_fragments: 0,
            }
        );

        let events = without_polls(&log.borrow(), 1);
        assert_eq!(events[0], SimEvent::Wrote(b"AT+CIPSEND=0,21\r\n".to_vec()));
        assert_eq!(events[1], SimEvent::Delay(20));

        // Status line from program memory goes out one byte at a time
        for (i, byte) in http::STATUS_200.iter().enumerate() {
            assert_eq!(events[2 + i], SimEvent::Wrote(std::vec![*byte]));
        }
        let rest = &events[2 + http::STATUS_200.len()..];
        assert_eq!(rest[0], SimEvent::Wrote(b"hi".to_vec()));
        assert_eq!(rest[1], SimEvent::Wrote(b"\r\n".to_vec()));
        assert_eq!(rest[2], SimEvent::Delay(1000));
        assert_eq!(rest[3], SimEvent::Wrote(b"AT+CIPCLOSE=0\r\n".to_vec()));
        assert_eq!(rest.len(), 4);

        let sends = module.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, 0);
        assert_eq!(sends[0].1, b"HTTP/1.1 200 OK\r\n\r\nhi".to_vec());
        assert_eq!(module.closed(), std::vec![0]);
    }

    #[test]
    fn test_unacknowledged_close_is_reported() {
        let log = event_log();
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080).silent_close();
        let mut session = session(&module, &log);
        session.bring_up();

        let report = session
            .send_http_200_static(2, Fragment::rom(http::SUCCESS_BODY))
            .unwrap();

        assert!(!report.closed);
        assert_eq!(report.bytes, http::STATUS_200.len() + http::SUCCESS_BODY.len());
        assert_eq!(module.closed(), std::vec![2]);
    }

    #[test]
    fn test_send_clears_active_channel() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);
        module.inject(b"+IPD,1,10:POST /fire HTTP/1.1\r\n");
        let inbound = session.poll().unwrap().unwrap();
        assert_eq!(inbound.route, Route::Fire);

        session
            .send_http_200_static(inbound.channel, Fragment::rom(http::SUCCESS_BODY))
            .unwrap();
        assert_eq!(session.active_channel(), None);
    }

    #[test]
    fn test_send_with_prefetch() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);

        let (report, prefetched) = session
            .send_http_200_with_prefetch(
                1,
                Fragment::rom(http::STATUS_HEAD),
                Fragment::rom(http::STATUS_TAIL),
                &["ssid__", "conctd", "bogus_", "port__"],
            )
            .unwrap();

        let body = b"{ssid__:\"leedy\",conctd:\"true\",port__:\"8080\",}";
        assert_eq!(prefetched.written, 3);
        assert_eq!(prefetched.unknown, 1);
        assert!(!prefetched.overflowed);
        assert_eq!(report.bytes, http::STATUS_200.len() + body.len());

        let sends = module.sends();
        assert_eq!(&sends[0].1[http::STATUS_200.len()..], &body[..]);
        assert!(module.commands().contains(&"AT+CWJAP_CUR?".into()));
    }

    #[test]
    fn test_prefetch_without_probe_field_skips_probe() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);

        session
            .send_http_200_with_prefetch(
                0,
                Fragment::rom(http::STATUS_HEAD),
                Fragment::rom(http::STATUS_TAIL),
                &["ipaddr", "macadr"],
            )
            .unwrap();

        assert!(!module.commands().contains(&"AT+CWJAP_CUR?".into()));
        let body = &module.sends()[0].1[http::STATUS_200.len()..];
        assert_eq!(
            body,
            b"{ipaddr:\"192.168.1.42\",macadr:\"5c:cf:7f:12:34:56\",}"
        );
    }

    #[test]
    fn test_enqueue_reports_rejected_fragments() {
        let mut queue = OutputQueue::<2>::new();
        let dropped = enqueue(
            &mut queue,
            &[
                Fragment::rom(http::STATUS_200),
                Fragment::ram(b"a"),
                Fragment::ram(b"b"),
            ],
        );

        assert_eq!(dropped, 1);
        assert_eq!(queue.total_len(), http::STATUS_200.len() + 1);
    }

    #[test]
    fn test_request_arriving_during_send_is_counted() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);
        module.inject(b"+IPD,1,18:GET / HTTP/1.1\r\n");

        let report = session
            .send_http_200_static(0, Fragment::rom(http::SUCCESS_BODY))
            .unwrap();

        assert!(report.closed);
        assert_eq!(session.link_mut().dropped_requests(), 1);
    }

    #[test]
    fn test_transactions_stay_in_step_with_replies() {
        let log = event_log();
        let (module, mut session) = ready_session(&log);

        // Every reply of bring-up has been consumed
        assert_eq!(session.link_mut().discard_pending(), Ok(0));
        assert!(session.is_connected());
        assert_eq!(session.refresh_addresses(), Ok(true));
        assert_eq!(session.network().ip.as_str(), "192.168.1.42");
        assert_eq!(module.commands().last().map(String::as_str), Some("AT+CIFSR"));
    }

    #[test]
    fn test_scan_networks() {
        let log = event_log();
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080)
            .with_scan(&["leedy", "neighbours", "cafe"]);
        let mut session = session(&module, &log);
        session.bring_up();

        let found = session.scan_networks().unwrap();
        let names: std::vec::Vec<&str> = found.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, ["leedy", "neighbours", "cafe"]);
        assert!(module.commands().contains(&"AT+CWLAPOPT=0,2".into()));
    }

    #[test]
    fn test_network_loaded_from_storage() {
        let log = event_log();
        let storage = MemStorage::new(256);
        ConfigStore::new(storage.clone())
            .save(&NetworkConfig::new("stored", "pw").unwrap())
            .unwrap();

        let session: SimSession = Session::new(
            SimModule::new(log.clone()),
            SimClock::with_log(log),
            storage,
            SessionConfig::default(),
        );
        assert_eq!(session.network().ssid.as_str(), "stored");
        assert_eq!(session.state(), SetupState::Uninitialized);
    }
}
