//! Routing inbound requests to gateway endpoints

use exchange_api::{parse_socket_path, SocketRoute};
use hyper::Method;

/// What an inbound request asks for
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Metrics,
    Healthz,
    /// Agent session endpoint; sessions are established elsewhere
    Session { cluster_id: &'a str },
    Proxy { cluster_id: &'a str, path: &'a str },
    NotFound,
}

pub fn route<'a>(method: &Method, path: &'a str) -> Route<'a> {
    match path {
        "/metrics" if method == Method::GET => return Route::Metrics,
        "/healthz" => return Route::Healthz,
        _ => {}
    }

    match parse_socket_path(path) {
        Some(SocketRoute::Proxy { cluster_id, path }) => Route::Proxy { cluster_id, path },
        Some(SocketRoute::Session { cluster_id }) => Route::Session { cluster_id },
        None => Route::NotFound,
    }
}
