/// API version v1alpha1 for socket proxy routes

pub mod socket;

pub use socket::{parse_socket_path, SocketRoute, SOCKETS_PATH_PREFIX};

/// API group for socket proxy routes
pub const API_GROUP: &str = "proxies.clusternet.io";
/// API version for socket proxy routes
pub const API_VERSION: &str = "v1alpha1";
