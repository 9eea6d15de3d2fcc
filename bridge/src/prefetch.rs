//! # Status Prefetch
//!
//! Renders the status values a settings page asks for into a small scratch
//! buffer that is then sent as one RAM fragment. Field names are fixed
//! six-character tags; each known tag becomes a `tag:"value",` token.
//!
//! ```text
//! ["ssid__", "port__"]  ──►  ssid__:"leedy",port__:"8080",
//! ```
//!
//! Unknown tags are logged and skipped. A token that does not fit in the
//! remaining space is skipped whole and flagged in the report.

use core::fmt::Write;

use heapless::{String, Vec};
use thiserror::Error;

/// Significant characters in a field tag
pub const FIELD_NAME_LEN: usize = 6;

/// Largest single rendered token
const TOKEN_CAPACITY: usize = 64;

/// Status values that can be prefetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    /// Configured network name
    Ssid,
    /// Result of the association probe
    Connected,
    /// Cached station IP
    IpAddress,
    /// Cached station MAC
    MacAddress,
    /// Server port
    Port,
}

impl Field {
    /// Every known field
    pub const ALL: [Field; 5] = [
        Field::Ssid,
        Field::Connected,
        Field::IpAddress,
        Field::MacAddress,
        Field::Port,
    ];

    /// Match the first [`FIELD_NAME_LEN`] characters of `name`
    pub fn from_name(name: &str) -> Option<Self> {
        let tag = name.get(..FIELD_NAME_LEN)?;
        Self::ALL.into_iter().find(|field| field.tag() == tag)
    }

    /// Wire tag of the field
    pub fn tag(&self) -> &'static str {
        match self {
            Field::Ssid => "ssid__",
            Field::Connected => "conctd",
            Field::IpAddress => "ipaddr",
            Field::MacAddress => "macadr",
            Field::Port => "port__",
        }
    }
}

/// Capacity alarm for the scratch buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrefetchError {
    /// The token does not fit in the remaining space
    #[error("prefetch buffer full")]
    ScratchFull,
}

/// Current values to render from
#[derive(Debug, Clone, Copy)]
pub struct StatusValues<'a> {
    /// Configured network name
    pub ssid: &'a str,
    /// Whether the module reported an association
    pub connected: bool,
    /// Cached station IP
    pub ip: &'a str,
    /// Cached station MAC
    pub mac: &'a str,
    /// Server port
    pub port: u16,
}

/// What happened while rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PrefetchReport {
    /// Tokens written
    pub written: usize,
    /// Field names that matched no tag
    pub unknown: usize,
    /// At least one token was dropped for lack of space
    pub overflowed: bool,
}

/// Append one token per known field in `fields` to `out`
pub fn render<const N: usize>(
    fields: &[&str],
    values: &StatusValues<'_>,
    out: &mut Vec<u8, N>,
) -> PrefetchReport {
    let mut report = PrefetchReport::default();
    for name in fields {
        let Some(field) = Field::from_name(name) else {
            log::warn!("prefetch: unknown field '{}'", name);
            report.unknown += 1;
            continue;
        };
        match append_token(out, field, values) {
            Ok(()) => report.written += 1,
            Err(e) => {
                log::warn!(
                    "prefetch: {} ({} of {} used), dropping '{}'",
                    e,
                    out.len(),
                    N,
                    field.tag()
                );
                report.overflowed = true;
            }
        }
    }
    report
}

fn append_token<const N: usize>(
    out: &mut Vec<u8, N>,
    field: Field,
    values: &StatusValues<'_>,
) -> Result<(), PrefetchError> {
    let mut token = String::<TOKEN_CAPACITY>::new();
    let written = match field {
        Field::Ssid => write!(token, "{}:\"{}\",", field.tag(), values.ssid),
        Field::Connected => write!(token, "{}:\"{}\",", field.tag(), values.connected),
        Field::IpAddress => write!(token, "{}:\"{}\",", field.tag(), values.ip),
        Field::MacAddress => write!(token, "{}:\"{}\",", field.tag(), values.mac),
        Field::Port => write!(token, "{}:\"{}\",", field.tag(), values.port),
    };
    if written.is_err() {
        return Err(PrefetchError::ScratchFull);
    }
    out.extend_from_slice(token.as_bytes())
        .map_err(|_| PrefetchError::ScratchFull)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALUES: StatusValues<'static> = StatusValues {
        ssid: "leedy",
        connected: false,
        ip: "10.0.0.9",
        mac: "5c:cf:7f:00:00:01",
        port: 8080,
    };

    #[test]
    fn test_field_lookup() {
        assert_eq!(Field::from_name("ssid__"), Some(Field::Ssid));
        assert_eq!(Field::from_name("port__\0"), Some(Field::Port));
        assert_eq!(Field::from_name("ssid"), None);
        assert_eq!(Field::from_name("volume"), None);
        for field in Field::ALL {
            assert_eq!(field.tag().len(), FIELD_NAME_LEN);
        }
    }

    #[test]
    fn test_render_known_fields_in_order() {
        let mut out = Vec::<u8, 128>::new();
        let report = render(&["conctd", "ipaddr", "macadr"], &VALUES, &mut out);

        assert_eq!(report.written, 3);
        assert!(!report.overflowed);
        assert_eq!(
            out.as_slice(),
            b"conctd:\"false\",ipaddr:\"10.0.0.9\",macadr:\"5c:cf:7f:00:00:01\","
        );
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let mut out = Vec::<u8, 128>::new();
        let report = render(&["xxxxxx", "port__", "??"], &VALUES, &mut out);

        assert_eq!(report.written, 1);
        assert_eq!(report.unknown, 2);
        assert_eq!(out.as_slice(), b"port__:\"8080\",");
    }

    #[test]
    fn test_overflow_skips_whole_token() {
        let mut out = Vec::<u8, 24>::new();
        let report = render(&["ssid__", "macadr", "port__"], &VALUES, &mut out);

        // ssid (15) fits, mac (27) does not, port (14) no longer fits
        assert_eq!(report.written, 1);
        assert!(report.overflowed);
        assert_eq!(out.as_slice(), b"ssid__:\"leedy\",");
    }
}
