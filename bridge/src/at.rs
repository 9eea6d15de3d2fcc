//! # AT Command Vocabulary
//!
//! The fixed set of commands we issue to the module, the reply fragments
//! that confirm them, and parsers for the few structured replies we read.
//! Every command is CRLF-terminated and built into a fixed-capacity string.

use core::fmt::Write;

use heapless::String;

use crate::line::find;

/// A formatted command line, CRLF included
pub type Command = String<160>;

/// A formatted reply fragment to look for
pub type Reply = String<80>;

/// Liveness probe
pub const PROBE: &[u8] = b"AT\r\n";
/// Query the Wi-Fi mode
pub const QUERY_MODE: &[u8] = b"AT+CWMODE?\r\n";
/// Query the joined access point
pub const QUERY_JOINED: &[u8] = b"AT+CWJAP?\r\n";
/// Query the joined access point (current, not saved, settings)
pub const QUERY_JOINED_CURRENT: &[u8] = b"AT+CWJAP_CUR?\r\n";
/// Query connection multiplexing
pub const QUERY_MUX: &[u8] = b"AT+CIPMUX?\r\n";
/// Enable connection multiplexing
pub const ENABLE_MUX: &[u8] = b"AT+CIPMUX=1\r\n";
/// Query station IP and MAC
pub const QUERY_ADDRESSES: &[u8] = b"AT+CIFSR\r\n";
/// Restrict scan output to SSIDs only
pub const SCAN_OPTIONS: &[u8] = b"AT+CWLAPOPT=0,2\r\n";
/// Scan for access points
pub const SCAN: &[u8] = b"AT+CWLAP\r\n";

/// Generic acknowledgement
pub const OK: &[u8] = b"OK";
/// Multiplexing is on
pub const MUX_ON: &[u8] = b"+CIPMUX:1";
/// The module is associated with some access point
pub const JOINED_CURRENT: &[u8] = b"+CWJAP_CUR:";
/// Marker of inbound data on a channel
pub const INBOUND_MARKER: &[u8] = b"IPD,";

/// Station (client) mode
pub const STATION_MODE: u8 = 1;

// Capacities are chosen so every argument at its maximum length fits.
fn command(args: core::fmt::Arguments<'_>) -> Command {
    let mut out = Command::new();
    let _ = out.write_fmt(args);
    out
}

/// `AT+CWMODE=<mode>`
pub fn set_mode(mode: u8) -> Command {
    command(format_args!("AT+CWMODE={}\r\n", mode))
}

/// String argument with `"`, `,` and `\` backslash-escaped
struct Escaped<'a>(&'a str);

impl core::fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for c in self.0.chars() {
            if matches!(c, '"' | ',' | '\\') {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        Ok(())
    }
}

/// `AT+CWJAP="<ssid>","<password>"`
pub fn join(ssid: &str, password: &str) -> Command {
    command(format_args!(
        "AT+CWJAP=\"{}\",\"{}\"\r\n",
        Escaped(ssid),
        Escaped(password)
    ))
}

/// `AT+CIPSERVER=1,<port>`
pub fn start_server(port: u16) -> Command {
    command(format_args!("AT+CIPSERVER=1,{}\r\n", port))
}

/// `AT+CIPSERVERMAXCONN=<n>`
pub fn max_connections(n: u8) -> Command {
    command(format_args!("AT+CIPSERVERMAXCONN={}\r\n", n))
}

/// `AT+CIPSEND=<channel>,<len>`
pub fn send(channel: u8, len: usize) -> Command {
    command(format_args!("AT+CIPSEND={},{}\r\n", channel, len))
}

/// `AT+CIPCLOSE=<channel>`
pub fn close(channel: u8) -> Command {
    command(format_args!("AT+CIPCLOSE={}\r\n", channel))
}

/// `+CWMODE:<mode>`
pub fn mode_reply(mode: u8) -> Reply {
    let mut out = Reply::new();
    let _ = write!(out, "+CWMODE:{}", mode);
    out
}

/// `+CWJAP:"<ssid>"`
pub fn joined_reply(ssid: &str) -> Reply {
    let mut out = Reply::new();
    let _ = write!(out, "+CWJAP:\"{}\"", Escaped(ssid));
    out
}

/// Channel number from an `+IPD,<channel>,<len>:...` notification
pub fn parse_channel(line: &[u8]) -> Option<u8> {
    let start = find(line, INBOUND_MARKER)? + INBOUND_MARKER.len();
    let digits = &line[start..];
    let end = digits
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    core::str::from_utf8(&digits[..end]).ok()?.parse().ok()
}

/// Text between the first pair of double quotes following `prefix`
pub fn parse_quoted<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    let start = find(line, prefix)? + prefix.len();
    let rest = &line[start..];
    let open = rest.iter().position(|&b| b == b'"')? + 1;
    let len = rest[open..].iter().position(|&b| b == b'"')?;
    Some(&rest[open..open + len])
}
