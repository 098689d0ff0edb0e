//! HTTP handlers for both modes.
//!
//! Runs on the service loop.  Handlers read and write shared state through
//! short lock sections; the only slow operation, a radio scan, is moved to
//! its own task so the loop keeps ticking.

use agv_kernel::{EmergencyAction, LoginOutcome, classify};
use agv_types::{AgvError, CommandSource, Credentials, NetworkMode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::controller::NetworkController;
use crate::http::{HttpExchange, Request, Response};
use crate::routes::{self, Resolution, Route};

const SETUP_PAGE: &str = include_str!("pages/setup.html");
const LOGIN_PAGE: &str = include_str!("pages/login.html");
const DASHBOARD_PAGE: &str = include_str!("pages/dashboard.html");

/// Longest accepted `/command` text in bytes.
pub const MAX_WEB_COMMAND_BYTES: usize = 256;

/// What the service loop must do after the response went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUp {
    None,
    Restart,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginBody {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandBody {
    command: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SaveWifiBody {
    ssid: String,
    password: String,
}

fn decode<T: DeserializeOwned>(request: &Request) -> Result<T, Response> {
    serde_json::from_slice(&request.body).map_err(|e| {
        debug!(path = %request.path, error = %e, "malformed JSON body");
        failure(400, &format!("Invalid JSON: {e}"))
    })
}

fn failure(status: u16, error: &str) -> Response {
    Response::json(status, &json!({ "success": false, "error": error }))
}

fn success() -> Response {
    Response::json(200, &json!({ "success": true }))
}

/// Route and answer one exchange.
pub(crate) fn dispatch(
    controller: &NetworkController,
    mode: NetworkMode,
    exchange: HttpExchange,
) -> FollowUp {
    let route = match routes::resolve(mode, exchange.request.method, &exchange.request.path) {
        Resolution::Matched(route) => route,
        Resolution::MethodNotAllowed => {
            exchange.respond(Response::text(405, "Method Not Allowed"));
            return FollowUp::None;
        }
        Resolution::Unmatched => {
            let response = match mode {
                NetworkMode::Provisioning => captive_redirect(controller),
                NetworkMode::Operational => {
                    Response::text(404, &format!("Not Found: {}", exchange.request.path))
                }
            };
            exchange.respond(response);
            return FollowUp::None;
        }
    };

    if route == Route::Scan {
        spawn_scan(controller, exchange);
        return FollowUp::None;
    }

    let (response, follow_up) = handle(controller, mode, route, &exchange.request);
    exchange.respond(response);
    follow_up
}

/// Answer a request for every route except [`Route::Scan`].
pub(crate) fn handle(
    controller: &NetworkController,
    mode: NetworkMode,
    route: Route,
    request: &Request,
) -> (Response, FollowUp) {
    match route {
        Route::SetupPage | Route::CaptiveProbe => (Response::html(SETUP_PAGE), FollowUp::None),
        Route::SaveWifi => save_wifi(controller, request),
        Route::Home => (home(controller, mode, request), FollowUp::None),
        Route::LoginPage => (Response::html(LOGIN_PAGE), FollowUp::None),
        Route::Login => (login(controller, request), FollowUp::None),
        Route::DashboardPage => (dashboard(controller), FollowUp::None),
        Route::Status => (status(controller), FollowUp::None),
        Route::Command => (command(controller, mode, request), FollowUp::None),
        Route::Scan => (
            Response::text(500, "scan must be dispatched asynchronously"),
            FollowUp::None,
        ),
    }
}

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

fn captive_redirect(controller: &NetworkController) -> Response {
    match controller.network_info().ip {
        Some(ip) => Response::redirect(&format!("http://{ip}/setup")),
        None => Response::redirect("/setup"),
    }
}

fn spawn_scan(controller: &NetworkController, exchange: HttpExchange) {
    let radio = controller.radio();
    let limit = controller.config().scan_timeout;
    tokio::spawn(async move {
        let response = match tokio::time::timeout(limit, radio.scan()).await {
            Ok(Ok(networks)) => {
                debug!(found = networks.len(), "scan complete");
                Response::json(200, &json!(networks))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "scan failed");
                failure(500, &e.to_string())
            }
            Err(_) => {
                warn!(?limit, "scan timed out");
                failure(500, "Scan timed out")
            }
        };
        exchange.respond(response);
    });
}

fn save_wifi(controller: &NetworkController, request: &Request) -> (Response, FollowUp) {
    let body: SaveWifiBody = match decode(request) {
        Ok(body) => body,
        Err(response) => return (response, FollowUp::None),
    };
    let credentials = Credentials::new(body.ssid.trim(), body.password.as_str());
    match controller.save_credentials(&credentials) {
        Ok(()) => {
            info!(ssid = credentials.network_name(), "credentials saved, restart scheduled");
            (success(), FollowUp::Restart)
        }
        Err(AgvError::Protocol(_)) => (failure(400, "SSID is required"), FollowUp::None),
        Err(e) => {
            warn!(error = %e, "saving credentials failed");
            (failure(500, &e.to_string()), FollowUp::None)
        }
    }
}

// ---------------------------------------------------------------------------
// Operational
// ---------------------------------------------------------------------------

fn home(controller: &NetworkController, mode: NetworkMode, request: &Request) -> Response {
    let authorized = controller
        .core()
        .lock()
        .session
        .validate(mode, request.bearer_token());
    if authorized {
        dashboard(controller)
    } else {
        Response::redirect("/login")
    }
}

fn dashboard(controller: &NetworkController) -> Response {
    let info = controller.network_info();
    let banner = if info.emergency {
        "AGV: !!! EMERGENCY STATE ACTIVE !!!"
    } else {
        "AGV: Waiting for connection..."
    };
    let socket_port = info
        .socket_addr
        .map(|a| a.port())
        .unwrap_or(controller.config().socket_port);
    Response::html(
        DASHBOARD_PAGE
            .replace("{{STATUS}}", banner)
            .replace("{{SOCKET_PORT}}", &socket_port.to_string()),
    )
}

fn login(controller: &NetworkController, request: &Request) -> Response {
    let body: LoginBody = match decode(request) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let outcome = controller
        .core()
        .lock()
        .session
        .login(&body.username, &body.password);
    match outcome {
        LoginOutcome::Granted(token) => {
            Response::json(200, &json!({ "success": true, "token": token }))
        }
        LoginOutcome::Rejected => failure(200, "Invalid credentials"),
        LoginOutcome::Throttled => failure(429, "Too many attempts"),
    }
}

fn status(controller: &NetworkController) -> Response {
    let info = controller.network_info();
    Response::json(
        200,
        &json!({
            "emergency": info.emergency,
            "connected": info.mode == Some(NetworkMode::Operational),
        }),
    )
}

fn command(controller: &NetworkController, mode: NetworkMode, request: &Request) -> Response {
    let body: Result<CommandBody, Response> = decode(request);

    // Stop commands are honoured without a session; everything else needs
    // the current bearer token.
    let is_stop = matches!(
        &body,
        Ok(b) if classify(b.command.trim()).action == EmergencyAction::Trigger
    );
    if !is_stop {
        let authorized = controller
            .core()
            .lock()
            .session
            .validate(mode, request.bearer_token());
        if !authorized {
            return Response::json(401, &json!({ "error": "Unauthorized" }));
        }
    }

    let body = match body {
        Ok(body) => body,
        Err(response) => return response,
    };
    if body.command.len() > MAX_WEB_COMMAND_BYTES {
        return failure(400, "Command too long");
    }
    if body.command.trim().is_empty() {
        return failure(400, "Invalid command");
    }

    let disposition = controller
        .arbitrator()
        .ingest(&body.command, CommandSource::WebAction);
    debug!(?disposition, "web command ingested");
    success()
}
