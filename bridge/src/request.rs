//! Request routing.
//!
//! The module prefixes the first line of every inbound request with
//! `+IPD,<channel>,<len>:`, so the method and path are on the same line as
//! the channel. Only that line is inspected.

use crate::line::find;
use crate::settings::SettingsPath;

/// What an inbound request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    /// `GET /`
    Index,
    /// `GET /config`
    Config,
    /// `GET /status`
    Status,
    /// `POST /fire`
    Fire,
    /// `POST /tilt_up`
    TiltUp,
    /// `POST /tilt_down`
    TiltDown,
    /// `POST /pan_left`
    PanLeft,
    /// `POST /pan_right`
    PanRight,
    /// A settings update, e.g. `POST /ssid__`
    Settings(SettingsPath),
    /// Anything else
    Unknown,
}

impl Route {
    /// Classify a request line
    pub fn parse(line: &[u8]) -> Self {
        let Some((method, path)) = request_target(line) else {
            return Route::Unknown;
        };
        if let Some(settings) = SettingsPath::from_path(path) {
            return Route::Settings(settings);
        }
        match (method, path) {
            (b"GET", b"/") => Route::Index,
            (b"GET", b"/config") => Route::Config,
            (b"GET", b"/status") => Route::Status,
            (b"POST", b"/fire") => Route::Fire,
            (b"POST", b"/tilt_up") => Route::TiltUp,
            (b"POST", b"/tilt_down") => Route::TiltDown,
            (b"POST", b"/pan_left") => Route::PanLeft,
            (b"POST", b"/pan_right") => Route::PanRight,
            _ => Route::Unknown,
        }
    }

    /// Check if the route moves or fires the cannon
    pub fn is_actuation(&self) -> bool {
        matches!(
            self,
            Route::Fire | Route::TiltUp | Route::TiltDown | Route::PanLeft | Route::PanRight
        )
    }
}

/// Method and path (query string removed) of an HTTP request line
fn request_target(line: &[u8]) -> Option<(&[u8], &[u8])> {
    // Skip the `+IPD,<channel>,<len>:` prefix if present
    let start = match find(line, b"IPD,") {
        Some(at) => at + find(&line[at..], b":")? + 1,
        None => 0,
    };
    let request = &line[start..];

    let space = request.iter().position(|&b| b == b' ')?;
    let method = &request[..space];
    let rest = &request[space + 1..];
    let end = rest
        .iter()
        .position(|&b| matches!(b, b' ' | b'?' | b'\r' | b'\n'))
        .unwrap_or(rest.len());
    let path = &rest[..end];

    if method.is_empty() || !path.starts_with(b"/") {
        return None;
    }
    Some((method, path))
}
