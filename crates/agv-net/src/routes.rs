//! Per-mode route tables.
//!
//! Only the table of the current mode is consulted, so a provisioning-only
//! path is unreachable once operational and vice versa.
//!
//! | Mode | Method | Path | Route |
//! |---|---|---|---|
//! | provisioning | GET | `/`, `/setup` | [`Route::SetupPage`] |
//! | provisioning | GET | `/generate_204`, `/fwlink`, `/hotspot-detect.html` | [`Route::CaptiveProbe`] |
//! | provisioning | GET | `/scan` | [`Route::Scan`] |
//! | provisioning | POST | `/savewifi` | [`Route::SaveWifi`] |
//! | operational | GET | `/` | [`Route::Home`] |
//! | operational | GET | `/login` | [`Route::LoginPage`] |
//! | operational | POST | `/login` | [`Route::Login`] |
//! | operational | GET | `/dashboard` | [`Route::DashboardPage`] |
//! | operational | GET | `/status` | [`Route::Status`] |
//! | operational | POST | `/command` | [`Route::Command`] |

use agv_types::NetworkMode;

use crate::http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SetupPage,
    CaptiveProbe,
    Scan,
    SaveWifi,
    Home,
    LoginPage,
    Login,
    DashboardPage,
    Status,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Matched(Route),
    /// The path exists in this mode but not for this method.
    MethodNotAllowed,
    Unmatched,
}

pub type RouteEntry = (Method, &'static str, Route);

const PROVISIONING: &[RouteEntry] = &[
    (Method::Get, "/", Route::SetupPage),
    (Method::Get, "/setup", Route::SetupPage),
    (Method::Get, "/generate_204", Route::CaptiveProbe),
    (Method::Get, "/fwlink", Route::CaptiveProbe),
    (Method::Get, "/hotspot-detect.html", Route::CaptiveProbe),
    (Method::Get, "/scan", Route::Scan),
    (Method::Post, "/savewifi", Route::SaveWifi),
];

const OPERATIONAL: &[RouteEntry] = &[
    (Method::Get, "/", Route::Home),
    (Method::Get, "/login", Route::LoginPage),
    (Method::Post, "/login", Route::Login),
    (Method::Get, "/dashboard", Route::DashboardPage),
    (Method::Get, "/status", Route::Status),
    (Method::Post, "/command", Route::Command),
];

pub fn table(mode: NetworkMode) -> &'static [RouteEntry] {
    match mode {
        NetworkMode::Provisioning => PROVISIONING,
        NetworkMode::Operational => OPERATIONAL,
    }
}

pub fn resolve(mode: NetworkMode, method: Method, path: &str) -> Resolution {
    let mut path_known = false;
    for &(m, p, route) in table(mode) {
        if p == path {
            if m == method {
                return Resolution::Matched(route);
            }
            path_known = true;
        }
    }
    if path_known {
        Resolution::MethodNotAllowed
    } else {
        Resolution::Unmatched
    }
}
