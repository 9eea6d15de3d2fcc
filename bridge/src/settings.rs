//! # Settings Update
//!
//! A settings request names a path token (`/ssid__`) on its request line and
//! carries `ssid__=<name>[&passwd=<password>]` either on that line (query
//! string) or on a following line (form body).
//!
//! ```text
//! request line ─► scan lines for "ssid__=" ─► join (≤ N attempts)
//!                        │ timeout                 │ ok          │ all failed
//!                        ▼                         ▼             ▼
//!                    FAIL page            persist, no reply   FAIL page
//! ```
//!
//! A successful SSID change drops the association the request came in on,
//! so nothing is sent back in that case. Values are form-encoded (`+` and
//! `%XX`) and are decoded before they reach the join command.

use embedded_io::{Read, ReadReady, Write};
use heapless::String;

use crate::at;
use crate::config::{PASSWORD_CAPACITY, SSID_CAPACITY};
use crate::http;
use crate::line::{contains, find};
use crate::link::printable;
use crate::queue::Fragment;
use crate::session::Session;
use crate::traits::{Clock, LinkError, NvStorage};

/// Settings a request can change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingsPath {
    /// Network name and passphrase
    Ssid,
}

impl SettingsPath {
    /// Path token, also used as the form field name
    pub fn token(&self) -> &'static [u8] {
        match self {
            SettingsPath::Ssid => b"ssid__",
        }
    }

    /// Settings path mentioned anywhere in `line`
    pub fn detect(line: &[u8]) -> Option<Self> {
        contains(line, SettingsPath::Ssid.token()).then_some(SettingsPath::Ssid)
    }

    /// Settings path addressed by a request path such as `/ssid__`
    pub fn from_path(path: &[u8]) -> Option<Self> {
        let name = path.strip_prefix(b"/")?;
        (name == SettingsPath::Ssid.token()).then_some(SettingsPath::Ssid)
    }
}

/// Result of [`Session::process_settings`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingsOutcome {
    /// The line names no settings path; nothing was done
    NotSettings,
    /// The module joined the new network
    Applied {
        /// Whether the new configuration reached storage
        persisted: bool,
    },
    /// No value arrived or the module could not join
    Failed {
        /// Whether the failure page was delivered
        responded: bool,
    },
}

/// Credentials carried by an SSID change, borrowed from the request line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsidChange<'a> {
    /// New network name
    pub ssid: &'a [u8],
    /// New passphrase, if the request carried one
    pub password: Option<&'a [u8]>,
}

/// Field carrying the passphrase next to `ssid__`
const PASSWORD_FIELD: &[u8] = b"passwd=";

/// Extract `ssid__=<value>` and an optional `passwd=<value>` from `line`
pub fn parse_ssid_change(line: &[u8]) -> Option<SsidChange<'_>> {
    let ssid = field_value(line, b"ssid__=")?;
    let password = field_value(line, PASSWORD_FIELD);
    Some(SsidChange { ssid, password })
}

/// Value following `key`, up to `\r`, `\n`, `&` or the end of the line
fn field_value<'a>(line: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
    let start = find(line, key)? + key.len();
    let value = &line[start..];
    let end = value
        .iter()
        .position(|&b| matches!(b, b'\r' | b'\n' | b'&'))
        .unwrap_or(value.len());
    Some(&value[..end])
}

/// Decode an `application/x-www-form-urlencoded` value
///
/// Returns `None` for a malformed escape, invalid UTF-8 or a value longer
/// than `N` bytes once decoded.
pub fn form_decode<const N: usize>(bytes: &[u8]) -> Option<String<N>> {
    let mut out = heapless::Vec::<u8, N>::new();
    let mut rest = bytes;
    while let Some((&byte, tail)) = rest.split_first() {
        let (decoded, tail) = match byte {
            b'+' => (b' ', tail),
            b'%' => match tail {
                [high, low, after @ ..] => (hex_value(*high)? << 4 | hex_value(*low)?, after),
                _ => return None,
            },
            other => (other, tail),
        };
        out.push(decoded).ok()?;
        rest = tail;
    }
    String::from_utf8(out).ok()
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

impl<T, C, S> Session<T, C, S>
where
    T: Read + Write + ReadReady,
    C: Clock,
    S: NvStorage,
{
    /// Handle a settings request arriving on `channel`
    ///
    /// `request_line` is the line that named the settings path; the value
    /// may be on it or on one of the lines that follow. Only complete lines
    /// are seen, so a form body must end in a line break. Browsers send the
    /// body without one, and such a request waits out
    /// `Timing::settings_wait_ms` and gets the failure page.
    ///
    /// If every join attempt fails the module is left without a network.
    /// The session then drops back to
    /// [`JoiningNetwork`](crate::session::SetupState::JoiningNetwork) and
    /// the caller must run setup again to restore the stored network.
    pub fn process_settings(&mut self, channel: u8, request_line: &[u8]) -> SettingsOutcome {
        let Some(path) = SettingsPath::detect(request_line) else {
            return SettingsOutcome::NotSettings;
        };
        log::info!("settings: update of {:?} on channel {}", path, channel);

        let mut left_network = false;
        let applied = match self.await_ssid_change(request_line) {
            Some((ssid, password)) => {
                let joined = self.apply_ssid_change(&ssid, &password);
                left_network = !joined;
                joined
            }
            None => false,
        };
        if applied {
            let persisted = match self.store.save(&self.network) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("settings: {}", e);
                    false
                }
            };
            return SettingsOutcome::Applied { persisted };
        }

        let responded = self
            .send_http_200_static(channel, Fragment::rom(http::FAILURE_BODY))
            .map_err(|e| log::warn!("settings: failure page not sent: {}", e))
            .is_ok();
        if left_network {
            self.require_rejoin();
        }
        SettingsOutcome::Failed { responded }
    }

    /// Find the credentials on `request_line` or the lines after it
    fn await_ssid_change(
        &mut self,
        request_line: &[u8],
    ) -> Option<(String<SSID_CAPACITY>, String<PASSWORD_CAPACITY>)> {
        if let Some(change) = parse_ssid_change(request_line) {
            return self.own_change(change);
        }

        let start = self.link.now_ms();
        let wait = u64::from(self.timing.settings_wait_ms);
        loop {
            let elapsed = self.link.now_ms().saturating_sub(start);
            if elapsed >= wait {
                log::warn!("settings: no value within {} ms", wait);
                return None;
            }
            match self.link.read_line_with_timeout((wait - elapsed) as u32) {
                Ok(()) => {}
                Err(LinkError::Timeout) => continue,
                Err(e) => {
                    log::warn!("settings: {}", e);
                    return None;
                }
            }
            if let Some(change) = parse_ssid_change(self.link.line()) {
                return self.own_change(change);
            }
        }
    }

    fn own_change(
        &self,
        change: SsidChange<'_>,
    ) -> Option<(String<SSID_CAPACITY>, String<PASSWORD_CAPACITY>)> {
        let ssid = form_decode::<SSID_CAPACITY>(change.ssid).filter(|s| !s.is_empty());
        let Some(ssid) = ssid else {
            log::warn!("settings: unusable network name '{}'", printable(change.ssid));
            return None;
        };
        let password = match change.password {
            Some(bytes) => match form_decode(bytes) {
                Some(password) => password,
                None => {
                    log::warn!("settings: unusable passphrase");
                    return None;
                }
            },
            None => self.network.password.clone(),
        };
        Some((ssid, password))
    }

    /// Join the new network, retrying a fixed number of times
    fn apply_ssid_change(&mut self, ssid: &str, password: &str) -> bool {
        let join = at::join(ssid, password);
        let attempts = self.timing.settings_attempts.max(1);
        for attempt in 1..=attempts {
            log::info!("settings: joining '{}' ({}/{})", ssid, attempt, attempts);
            if self
                .link
                .execute(join.as_bytes(), at::OK, self.timing.long_timeout_ms)
                .is_ok()
            {
                if self.network.set_credentials(ssid, password).is_err() {
                    return false;
                }
                if let Err(e) = self.refresh_addresses() {
                    log::warn!("settings: could not read station addresses: {}", e);
                }
                return true;
            }
            if attempt < attempts {
                self.link.delay_ms(self.timing.stage_retry_ms);
            }
        }
        log::warn!("settings: could not join '{}'", ssid);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, NetworkConfig, SENTINEL};
    use crate::session::{SessionConfig, SetupState};
    use crate::sim::{event_log, EventLog, MemStorage, SimClock, SimModule};

    type SimSession = Session<SimModule, SimClock, MemStorage>;

    fn ready(log: &EventLog, module: &SimModule, storage: &MemStorage) -> SimSession {
        let mut session = Session::new(
            module.clone(),
            SimClock::with_log(log.clone()),
            storage.clone(),
            SessionConfig::default(),
        );
        session.set_network(NetworkConfig::new("leedy", "goat").unwrap());
        session.bring_up();
        session
    }

    #[test]
    fn test_detect_and_path() {
        assert_eq!(SettingsPath::detect(b"POST /ssid__ HTTP/1.1\r\n"), Some(SettingsPath::Ssid));
        assert_eq!(SettingsPath::detect(b"POST /fire HTTP/1.1\r\n"), None);
        assert_eq!(SettingsPath::from_path(b"/ssid__"), Some(SettingsPath::Ssid));
        assert_eq!(SettingsPath::from_path(b"/ssid"), None);
    }

    #[test]
    fn test_parse_value_stops_at_terminator() {
        let change = parse_ssid_change(b"ssid__=NEWSSID\n").unwrap();
        assert_eq!(change.ssid, b"NEWSSID");
        assert_eq!(change.password, None);

        let change = parse_ssid_change(b"ssid__=attic&passwd=hunter22\r\n").unwrap();
        assert_eq!(change.ssid, b"attic");
        assert_eq!(change.password, Some(&b"hunter22"[..]));

        assert_eq!(parse_ssid_change(b"POST /ssid__ HTTP/1.1\r\n"), None);
    }

    #[test]
    fn test_value_on_request_line_is_applied_and_persisted() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080)
            .with_network("NEWSSID", "goat");
        let mut session = ready(&log, &module, &storage);

        let outcome = session.process_settings(0, b"ssid__=NEWSSID\n");

        assert_eq!(outcome, SettingsOutcome::Applied { persisted: true });
        assert!(module
            .commands()
            .contains(&"AT+CWJAP=\"NEWSSID\",\"goat\"".into()));
        assert!(!module.commands().iter().any(|c| c.starts_with("AT+CIPSEND")));
        assert!(module.sends().is_empty());

        assert_eq!(storage.bytes()[0], SENTINEL);
        let stored = ConfigStore::new(storage.clone()).load().unwrap().unwrap();
        assert_eq!(stored.ssid.as_str(), "NEWSSID");
        assert_eq!(stored.password.as_str(), "goat");
        assert_eq!(session.network().ssid.as_str(), "NEWSSID");
    }

    #[test]
    fn test_value_on_following_line() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080)
            .with_network("attic", "hunter22");
        let mut session = ready(&log, &module, &storage);

        module.inject(b"Host: cannon\r\n\r\nssid__=attic&passwd=hunter22\r\n");
        let outcome = session.process_settings(1, b"+IPD,1,220:POST /ssid__ HTTP/1.1\r\n");

        assert_eq!(outcome, SettingsOutcome::Applied { persisted: true });
        let stored = ConfigStore::new(storage).load().unwrap().unwrap();
        assert_eq!(stored.password.as_str(), "hunter22");
    }

    #[test]
    fn test_missing_value_sends_failure() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080);
        let mut session = ready(&log, &module, &storage);

        let outcome = session.process_settings(2, b"+IPD,2,220:POST /ssid__ HTTP/1.1\r\n");

        assert_eq!(outcome, SettingsOutcome::Failed { responded: true });
        let sends = module.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, 2);
        assert!(sends[0].1.ends_with(http::FAILURE_BODY));
        assert_eq!(storage.bytes()[0], 0xFF);
    }

    #[test]
    fn test_join_failure_after_all_attempts() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080);
        let mut session = ready(&log, &module, &storage);

        let outcome = session.process_settings(0, b"ssid__=nowhere&passwd=x\r\n");

        assert_eq!(outcome, SettingsOutcome::Failed { responded: true });
        let joins = module
            .commands()
            .iter()
            .filter(|c| c.starts_with("AT+CWJAP=\"nowhere\""))
            .count();
        assert_eq!(joins, 3);
        assert_eq!(session.network().ssid.as_str(), "leedy");
        assert_eq!(storage.bytes()[0], 0xFF);

        // The failed joins left the old network; setup must run again
        assert_eq!(module.joined(), None);
        assert_eq!(session.state(), SetupState::JoiningNetwork);
        assert!(!session.is_ready());

        session.bring_up();
        assert!(session.is_ready());
        assert_eq!(module.joined().as_deref(), Some("leedy"));
    }

    #[test]
    fn test_form_decode() {
        assert_eq!(form_decode::<16>(b"My+Net").as_deref(), Some("My Net"));
        assert_eq!(form_decode::<16>(b"a%26b%2C").as_deref(), Some("a&b,"));
        assert_eq!(form_decode::<16>(b"caf%C3%A9").as_deref(), Some("caf\u{e9}"));
        assert_eq!(form_decode::<16>(b"bad%zz"), None);
        assert_eq!(form_decode::<16>(b"cut%2"), None);
        assert_eq!(form_decode::<16>(b"%FF"), None);
        assert_eq!(form_decode::<4>(b"toolong"), None);
    }

    #[test]
    fn test_encoded_values_are_decoded_before_joining() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080)
            .with_network("My Net", "a&b");
        let mut session = ready(&log, &module, &storage);

        let outcome = session.process_settings(0, b"ssid__=My+Net&passwd=a%26b\r\n");

        assert_eq!(outcome, SettingsOutcome::Applied { persisted: true });
        assert!(module
            .commands()
            .contains(&"AT+CWJAP=\"My Net\",\"a&b\"".into()));
        assert_eq!(module.joined().as_deref(), Some("My Net"));
        assert_eq!(session.network().password.as_str(), "a&b");
    }

    #[test]
    fn test_quotes_in_values_cannot_add_arguments() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080)
            .with_network("x\",\"y", "p");
        let mut session = ready(&log, &module, &storage);

        let outcome = session.process_settings(0, b"ssid__=x%22%2C%22y&passwd=p\r\n");

        assert_eq!(outcome, SettingsOutcome::Applied { persisted: true });
        assert!(module
            .commands()
            .contains(&"AT+CWJAP=\"x\\\"\\,\\\"y\",\"p\"".into()));
        assert_eq!(module.joined().as_deref(), Some("x\",\"y"));
    }

    #[test]
    fn test_unterminated_body_times_out() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080)
            .with_network("attic", "goat");
        let mut session = ready(&log, &module, &storage);

        // Body as a browser sends it, with no line break after the value
        module.inject(b"Host: cannon\r\n\r\nssid__=attic");
        let outcome = session.process_settings(1, b"+IPD,1,220:POST /ssid__ HTTP/1.1\r\n");

        assert_eq!(outcome, SettingsOutcome::Failed { responded: true });
        assert!(!module.commands().iter().any(|c| c.starts_with("AT+CWJAP=")));
        assert_eq!(module.sends().len(), 1);
        assert!(session.is_ready());
    }

    #[test]
    fn test_unrelated_line_is_ignored() {
        let log = event_log();
        let storage = MemStorage::new(256);
        let module = SimModule::configured(log.clone(), "leedy", "goat", 8080);
        let mut session = ready(&log, &module, &storage);

        assert_eq!(
            session.process_settings(0, b"+IPD,0,200:POST /fire HTTP/1.1\r\n"),
            SettingsOutcome::NotSettings
        );
        assert!(module.sends().is_empty());
    }
}
