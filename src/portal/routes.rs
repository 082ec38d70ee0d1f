//! Provisioning HTTP routes.
//!
//! Handlers run on the HTTP server thread. They never touch the radio or
//! the store: state changes are queued for the supervisor as
//! [`PortalRequest`]s and status is read from the shared snapshot.
//!
//! | Route          | Reply                                                  |
//! |----------------|--------------------------------------------------------|
//! | `GET /`        | configuration page                                     |
//! | `GET /scan`    | `{"networks":[{"ssid","rssi","encryption"}]}`          |
//! | `POST /config` | `{"status","message"}`, 400 on missing/invalid fields  |
//! | `GET /status`  | `{"connected","ssid","ip","configMode"}`               |
//! | `POST /reset`  | `{"status","message"}`, always 200                     |
//! | anything else  | configuration page                                     |

use super::page::CONFIG_PAGE;
use super::PortalRequest;
use crate::config::NetworkCredentials;
use crate::radio::ScanResult;
use crate::status::SharedStatus;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::time::Duration;
use tiny_http::Method;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const CONTENT_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_JSON: &str = "application/json";

const MSG_SAVED: &str = "Config saved! Attempting to connect...";
const MSG_MISSING: &str = "Missing SSID or password";
const MSG_BUSY: &str = "Device busy, try again";
const MSG_RESET: &str = "WiFi config reset! Device will restart...";

/// What a handler needs from the outside world.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub status: SharedStatus,
    pub requests: SyncSender<PortalRequest>,
    /// How long `/scan` waits for the supervisor's results.
    pub scan_timeout: Duration,
}

/// A fully formed HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpReply {
    fn page() -> Self {
        Self {
            status: 200,
            content_type: CONTENT_HTML,
            body: CONFIG_PAGE.to_string(),
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: CONTENT_JSON,
                body,
            },
            Err(e) => Self {
                status: 500,
                content_type: CONTENT_JSON,
                body: format!(r#"{{"status":"error","message":"{}"}}"#, e),
            },
        }
    }

    fn ack(status: u16, outcome: &str, message: &str) -> Self {
        Self::json(
            status,
            &Ack {
                status: outcome,
                message,
            },
        )
    }
}

/// `/status` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub connected: bool,
    pub ssid: String,
    /// Dotted quad, `0.0.0.0` when not connected.
    pub ip: String,
    pub config_mode: bool,
}

#[derive(Debug, Serialize)]
struct NetworkEntry {
    ssid: String,
    rssi: i8,
    encryption: &'static str,
}

#[derive(Debug, Serialize)]
struct ScanReply {
    networks: Vec<NetworkEntry>,
}

#[derive(Debug, Serialize)]
struct Ack<'a> {
    status: &'a str,
    message: &'a str,
}

#[derive(Debug, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
struct ConfigForm {
    ssid: Option<String>,
    password: Option<String>,
}

impl ConfigForm {
    fn parse(encoded: &str) -> Self {
        serde_urlencoded::from_str(encoded).unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.ssid.is_none() && self.password.is_none()
    }
}

/// Route one request.
pub fn handle(ctx: &RouteContext, method: &Method, url: &str, body: &str) -> HttpReply {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    match (method, path) {
        (Method::Post, "/config") => submit_config(ctx, body, query),
        (Method::Get, "/scan") => scan(ctx),
        (Method::Get, "/status") => status(ctx),
        (Method::Post, "/reset") => reset(ctx),
        _ => HttpReply::page(),
    }
}

fn submit_config(ctx: &RouteContext, body: &str, query: &str) -> HttpReply {
    let mut form = ConfigForm::parse(body);
    if form.is_empty() {
        form = ConfigForm::parse(query);
    }

    let (Some(ssid), Some(password)) = (form.ssid.take(), form.password.take()) else {
        return HttpReply::ack(400, "error", MSG_MISSING);
    };

    let credentials = match NetworkCredentials::new(ssid, password) {
        Ok(c) => c,
        Err(e) => {
            warn!("Rejected submitted credentials: {}", e);
            return HttpReply::ack(400, "error", &format!("Invalid credentials: {}", e));
        }
    };

    info!("Credentials submitted for '{}'", credentials.ssid);
    match ctx
        .requests
        .try_send(PortalRequest::SubmitCredentials(credentials))
    {
        Ok(()) => HttpReply::ack(200, "success", MSG_SAVED),
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
            warn!("Portal request queue unavailable, submission refused");
            HttpReply::ack(503, "error", MSG_BUSY)
        }
    }
}

fn scan(ctx: &RouteContext) -> HttpReply {
    let (reply_tx, reply_rx) = mpsc::sync_channel::<Vec<ScanResult>>(1);

    let results = match ctx.requests.try_send(PortalRequest::Scan(reply_tx)) {
        Ok(()) => reply_rx.recv_timeout(ctx.scan_timeout).unwrap_or_else(|_| {
            warn!("Scan timed out after {:?}", ctx.scan_timeout);
            Vec::new()
        }),
        Err(_) => {
            warn!("Portal request queue unavailable, empty scan");
            Vec::new()
        }
    };

    let networks = results
        .into_iter()
        .map(|r| NetworkEntry {
            ssid: r.ssid,
            rssi: r.signal_strength,
            encryption: if r.is_open { "Open" } else { "Secured" },
        })
        .collect();
    HttpReply::json(200, &ScanReply { networks })
}

fn status(ctx: &RouteContext) -> HttpReply {
    HttpReply::json(200, &status_report(&ctx.status))
}

/// Build the `/status` body from the shared snapshot.
pub fn status_report(status: &SharedStatus) -> StatusReport {
    let snap = status.snapshot();
    StatusReport {
        connected: snap.connected(),
        ssid: snap.ssid.clone(),
        ip: snap
            .ip
            .filter(|_| snap.connected())
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        config_mode: snap.config_mode(),
    }
}

fn reset(ctx: &RouteContext) -> HttpReply {
    info!("Factory reset requested from portal");
    if let Err(e) = ctx.requests.try_send(PortalRequest::FactoryReset) {
        warn!("Could not queue factory reset: {}", e);
    }
    HttpReply::ack(200, "success", MSG_RESET)
}
