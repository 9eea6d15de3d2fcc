//! # Cannon Bridge Simulator
//!
//! Runs the bridge engine against a simulated ESP8266 on the desktop:
//! brings the module up, scans for access points, then replays a handful of
//! browser requests (pages, status, actuation and a settings change) and
//! logs what went over the wire.
//!
//! ```text
//! cannon-sim [overrides.json]
//! RUST_LOG=debug cannon-sim      # show every AT line
//! ```
//!
//! The optional JSON file may carry `network` and `server` sections that
//! replace the compiled defaults.

use std::path::Path;

use log::{error, info, warn};
use serde::Deserialize;
use thiserror::Error;

use cannon_bridge::config::{ConfigError, ConfigStore, NetworkConfig, ServerConfig};
use cannon_bridge::http;
use cannon_bridge::request::Route;
use cannon_bridge::session::Inbound;
use cannon_bridge::sim::{event_log, MemStorage, SimClock, SimModule};
use cannon_bridge::{Fragment, LinkError, Session, SessionConfig, SettingsOutcome};

type SimSession = Session<SimModule, SimClock, MemStorage>;

/// Size of the simulated settings EEPROM
const STORAGE_SIZE: usize = 256;

/// Polls allowed for one injected request to surface
const MAX_POLLS: usize = 16;

/// Fields requested by the settings page
const STATUS_FIELDS: [&str; 5] = ["ssid__", "conctd", "ipaddr", "macadr", "port__"];

/// Errors that end a simulator run
#[derive(Error, Debug)]
enum SimError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid overrides: {0}")]
    Overrides(#[from] serde_json::Error),
    #[error("settings storage: {0}")]
    Storage(#[from] ConfigError),
    #[error("serial link: {0}")]
    Link(#[from] LinkError),
}

/// Contents of the optional overrides file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Overrides {
    network: Option<NetworkConfig>,
    server: Option<ServerConfig>,
}

fn load_overrides(path: &Path) -> Result<Overrides, SimError> {
    let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Browser traffic replayed after bring-up
///
/// The settings body ends in a line break so the engine sees it as a
/// complete line. A browser sends the form body without one.
const SCRIPT: &[&[u8]] = &[
    b"0,CONNECT\r\n\r\n+IPD,0,310:GET / HTTP/1.1\r\n",
    b"+IPD,0,311:GET /config HTTP/1.1\r\n",
    b"+IPD,1,305:GET /status HTTP/1.1\r\n",
    b"+IPD,0,182:POST /tilt_up HTTP/1.1\r\n",
    b"+IPD,0,182:POST /fire HTTP/1.1\r\n",
    b"+IPD,2,298:GET /favicon.ico HTTP/1.1\r\n",
    b"+IPD,0,240:POST /ssid__ HTTP/1.1\r\nHost: cannon\r\n\r\nssid__=workshop&passwd=sawdust\r\n",
];

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("cannon-sim {}", cannon_bridge::VERSION);

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), SimError> {
    let overrides = match std::env::args().nth(1) {
        Some(path) => load_overrides(Path::new(&path))?,
        None => Overrides::default(),
    };

    let storage = MemStorage::new(STORAGE_SIZE);
    if let Some(network) = &overrides.network {
        info!("sim: storing network settings for '{}'", network.ssid);
        ConfigStore::new(storage.clone()).save(network)?;
    }
    let network = overrides.network.clone().unwrap_or_default();

    let module = SimModule::new(event_log())
        .with_network(&network.ssid, &network.password)
        .with_network("workshop", "sawdust")
        .with_scan(&[network.ssid.as_str(), "workshop", "neighbours"]);
    let config = SessionConfig {
        server: overrides.server.unwrap_or_default(),
        ..SessionConfig::default()
    };

    let mut session = Session::new(module.clone(), SimClock::new(), storage.clone(), config);
    session.bring_up();

    let found = session.scan_networks()?;
    info!("sim: {} access points in range", found.len());
    for ssid in &found {
        info!("sim:   {}", ssid);
    }

    for traffic in SCRIPT {
        module.inject(traffic);
        match next_request(&mut session)? {
            Some(inbound) => dispatch(&mut session, inbound)?,
            None => warn!("sim: injected traffic produced no request"),
        }
    }

    info!(
        "sim: {} responses sent, channels closed: {:?}",
        module.sends().len(),
        module.closed()
    );
    if let Some(stored) = ConfigStore::new(storage).load()? {
        info!("sim: stored network is now '{}'", stored.ssid);
    }
    Ok(())
}

fn next_request(session: &mut SimSession) -> Result<Option<Inbound>, SimError> {
    for _ in 0..MAX_POLLS {
        if let Some(inbound) = session.poll()? {
            return Ok(Some(inbound));
        }
    }
    Ok(None)
}

fn dispatch(session: &mut SimSession, inbound: Inbound) -> Result<(), SimError> {
    let channel = inbound.channel;
    match inbound.route {
        Route::Index => {
            session.send_http_200_static(channel, Fragment::rom(http::INDEX_PAGE))?;
        }
        Route::Config => {
            session.send_http_200_static(channel, Fragment::rom(http::CONFIG_PAGE))?;
        }
        Route::Status => {
            let (_, prefetched) = session.send_http_200_with_prefetch(
                channel,
                Fragment::rom(http::STATUS_HEAD),
                Fragment::rom(http::STATUS_TAIL),
                &STATUS_FIELDS,
            )?;
            info!("sim: status carried {} values", prefetched.written);
        }
        route if route.is_actuation() => {
            info!("sim: actuating {:?}", route);
            session.send_http_200_static(channel, Fragment::rom(http::SUCCESS_BODY))?;
        }
        Route::Settings(_) => {
            let request_line = session.last_line().to_vec();
            match session.process_settings(channel, &request_line) {
                SettingsOutcome::Applied { persisted } => {
                    info!("sim: network changed (persisted: {})", persisted)
                }
                outcome => warn!("sim: settings not applied: {:?}", outcome),
            }
            if !session.is_ready() {
                info!("sim: rejoining '{}'", session.network().ssid);
                session.bring_up();
            }
        }
        _ => {
            warn!("sim: no handler for request on channel {}", channel);
            session.send_http_200_static(channel, Fragment::rom(http::BLANK_PAGE))?;
        }
    }
    Ok(())
}
