//! Forwarded credentials carried in extra headers

use crate::tls::ClientIdentity;
use crate::transport::Transport;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use exchange_core::{ExchangeError, Result};
use exchange_tunnel::TunnelService;
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::collections::BTreeMap;
use tracing::debug;

pub const TOKEN_HEADER_KEY: &str = "Clusternet-Token";
pub const CERTIFICATE_HEADER_KEY: &str = "Clusternet-Certificate";
pub const PRIVATE_KEY_HEADER_KEY: &str = "Clusternet-PrivateKey";

/// Collect extra values from headers named `<prefix><key>`.
///
/// Keys are lowercased and percent-unescaped (kept raw when unescaping
/// fails). Values keep their raw bytes and header order; prefixes are
/// scanned in order.
pub fn extract_extra(
    headers: &HeaderMap,
    prefixes: &[String],
) -> BTreeMap<String, Vec<HeaderValue>> {
    let mut extra: BTreeMap<String, Vec<HeaderValue>> = BTreeMap::new();

    for prefix in prefixes {
        let prefix = prefix.to_ascii_lowercase();
        for (name, value) in headers {
            let Some(raw_key) = name.as_str().strip_prefix(prefix.as_str()) else {
                continue;
            };
            let raw_key = raw_key.to_ascii_lowercase();
            let key = match urlencoding::decode(&raw_key) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => raw_key,
            };
            extra.entry(key).or_default().push(value.clone());
        }
    }

    extra
}

fn has_any_prefix(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        name.len() >= prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

/// Credentials recognised among the extras
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    pub token: Option<HeaderValue>,
    /// Base64 of a PEM certificate chain
    pub certificate: Option<HeaderValue>,
    /// Base64 of a PEM private key
    pub private_key: Option<HeaderValue>,
}

impl CredentialSet {
    pub fn from_extra(extra: &BTreeMap<String, Vec<HeaderValue>>) -> Self {
        let first = |key: &str| {
            extra
                .get(&key.to_ascii_lowercase())
                .and_then(|values| values.first())
                .filter(|value| !value.is_empty())
                .cloned()
        };

        Self {
            token: first(TOKEN_HEADER_KEY),
            certificate: first(CERTIFICATE_HEADER_KEY),
            private_key: first(PRIVATE_KEY_HEADER_KEY),
        }
    }

    /// Decode the certificate and key, when both are present
    pub fn client_identity(&self) -> Result<Option<ClientIdentity>> {
        let (Some(certificate), Some(private_key)) = (&self.certificate, &self.private_key) else {
            return Ok(None);
        };

        let cert_pem = STANDARD.decode(certificate.as_bytes()).map_err(|e| {
            ExchangeError::InvalidRequest(format!(
                "invalid certificate in header {}: {}",
                CERTIFICATE_HEADER_KEY, e
            ))
        })?;
        let key_pem = STANDARD.decode(private_key.as_bytes()).map_err(|e| {
            ExchangeError::InvalidRequest(format!(
                "invalid private key in header {}: {}",
                PRIVATE_KEY_HEADER_KEY, e
            ))
        })?;

        ClientIdentity::from_pem(&cert_pem, &key_pem)
            .map(Some)
            .map_err(invalid_key_pair)
    }
}

fn invalid_key_pair(e: impl std::fmt::Display) -> ExchangeError {
    ExchangeError::InvalidRequest(format!("invalid key pair in header: {}", e))
}

/// `Bearer <token>` built from the token's raw bytes
fn bearer(token: &HeaderValue) -> Result<HeaderValue> {
    let mut value = b"Bearer ".to_vec();
    value.extend_from_slice(token.as_bytes());
    let mut bearer = HeaderValue::from_bytes(&value).map_err(|e| {
        ExchangeError::InvalidRequest(format!(
            "invalid token in header {}: {}",
            TOKEN_HEADER_KEY, e
        ))
    })?;
    bearer.set_sensitive(true);
    Ok(bearer)
}

/// Outbound headers and the transport to use for them
#[derive(Debug, Clone)]
pub struct Injection {
    pub headers: HeaderMap,
    pub transport: Option<Transport>,
}

/// Apply forwarded credentials to a copy of `headers`.
///
/// A bearer token overwrites `Authorization`. A certificate and key build a
/// fresh tunneled transport for `cluster_id` that replaces `base`. Every
/// header under a configured prefix is removed from the result.
pub fn inject(
    headers: &HeaderMap,
    prefixes: &[String],
    cluster_id: &str,
    base: Option<Transport>,
    tunnel: &dyn TunnelService,
) -> Result<Injection> {
    let credentials = CredentialSet::from_extra(&extract_extra(headers, prefixes));

    let mut outbound = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !has_any_prefix(name.as_str(), prefixes) {
            outbound.append(name.clone(), value.clone());
        }
    }

    if let Some(token) = &credentials.token {
        outbound.insert(AUTHORIZATION, bearer(token)?);
    }

    let mut transport = base;
    if let Some(identity) = credentials.client_identity()? {
        let with_cert = Transport::tunneled_with_identity(tunnel.dialer(cluster_id), identity)
            .map_err(invalid_key_pair)?;
        debug!(cluster = %cluster_id, "Using client certificate from request headers");
        transport = Some(with_cert);
    }

    Ok(Injection {
        headers: outbound,
        transport,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use exchange_tunnel::{BoxedStream, Dial, Dialer};
    use std::io;
    use std::sync::Arc;

    struct Refuse;

    #[async_trait]
    impl Dial for Refuse {
        async fn dial(&self, _addr: &str) -> io::Result<BoxedStream> {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }
    }

    struct AlwaysConnected;

    impl TunnelService for AlwaysConnected {
        fn has_session(&self, _cluster_id: &str) -> bool {
            true
        }

        fn dialer(&self, cluster_id: &str) -> Dialer {
            Dialer::new(cluster_id, Arc::new(Refuse))
        }
    }

    fn prefixes() -> Vec<String> {
        vec!["X-Remote-Extra-".to_string()]
    }

    fn key_pair_b64() -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec!["child".to_string()]).unwrap();
        (
            STANDARD.encode(certified.cert.pem()),
            STANDARD.encode(certified.key_pair.serialize_pem()),
        )
    }

    #[test]
    fn test_extract_extra_keeps_value_order() {
        let mut headers = HeaderMap::new();
        headers.append(
            "X-Remote-Extra-Clusternet-Token",
            HeaderValue::from_static("a"),
        );
        headers.append(
            "x-remote-extra-clusternet-token",
            HeaderValue::from_static("b"),
        );
        headers.insert("X-Other", HeaderValue::from_static("c"));

        let extra = extract_extra(&headers, &prefixes());
        assert_eq!(extra.len(), 1);
        assert_eq!(extra["clusternet-token"], vec!["a", "b"]);
    }

    #[test]
    fn test_extract_extra_unescapes_keys() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Remote-Extra-Scopes%2fread",
            HeaderValue::from_static("yes"),
        );

        let extra = extract_extra(&headers, &prefixes());
        assert_eq!(extra["scopes/read"], vec!["yes"]);
    }

    #[test]
    fn test_token_becomes_bearer_and_extras_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        headers.insert(
            "X-Remote-Extra-Clusternet-Token",
            HeaderValue::from_static("tok"),
        );
        headers.insert("X-Remote-Extra-Unrelated", HeaderValue::from_static("x"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        let injection = inject(&headers, &prefixes(), "c1", None, &AlwaysConnected).unwrap();
        assert_eq!(injection.headers[AUTHORIZATION], "Bearer tok");
        assert_eq!(injection.headers["accept"], "application/json");
        assert!(injection
            .headers
            .keys()
            .all(|name| !name.as_str().starts_with("x-remote-extra-")));
        assert!(injection.transport.is_none());

        // The inbound headers are untouched
        assert_eq!(headers[AUTHORIZATION], "Basic Zm9v");
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn test_token_bytes_are_forwarded_unchanged() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Remote-Extra-Clusternet-Token",
            HeaderValue::from_bytes(b"t\xe9k").unwrap(),
        );

        let injection = inject(&headers, &prefixes(), "c1", None, &AlwaysConnected).unwrap();
        let authorization = &injection.headers[AUTHORIZATION];
        assert_eq!(authorization.as_bytes(), b"Bearer t\xe9k");
        assert!(authorization.is_sensitive());
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Remote-Extra-Clusternet-Token",
            HeaderValue::from_static(""),
        );

        let injection = inject(&headers, &prefixes(), "c1", None, &AlwaysConnected).unwrap();
        assert!(injection.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_lone_certificate_is_ignored() {
        let (cert, _) = key_pair_b64();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Remote-Extra-Clusternet-Certificate",
            HeaderValue::from_str(&cert).unwrap(),
        );

        let injection = inject(&headers, &prefixes(), "c1", None, &AlwaysConnected).unwrap();
        assert!(injection.transport.is_none());
        assert!(injection.headers.is_empty());
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let (_, key) = key_pair_b64();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Remote-Extra-Clusternet-Certificate",
            HeaderValue::from_static("***not base64***"),
        );
        headers.insert(
            "X-Remote-Extra-Clusternet-PrivateKey",
            HeaderValue::from_str(&key).unwrap(),
        );

        let err = inject(&headers, &prefixes(), "c1", None, &AlwaysConnected).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidRequest(_)));
        assert!(err
            .to_string()
            .starts_with("invalid certificate in header Clusternet-Certificate"));
    }

    #[test]
    fn test_mismatched_key_pair_is_rejected() {
        let (cert, _) = key_pair_b64();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Remote-Extra-Clusternet-Certificate",
            HeaderValue::from_str(&cert).unwrap(),
        );
        headers.insert(
            "X-Remote-Extra-Clusternet-PrivateKey",
            HeaderValue::from_str(&STANDARD.encode("not a key")).unwrap(),
        );

        let err = inject(&headers, &prefixes(), "c1", None, &AlwaysConnected).unwrap_err();
        assert!(err.to_string().starts_with("invalid key pair in header"));
    }

    #[test]
    fn test_certificate_builds_fresh_transport() {
        let (cert, key) = key_pair_b64();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Remote-Extra-Clusternet-Certificate",
            HeaderValue::from_str(&cert).unwrap(),
        );
        headers.insert(
            "X-Remote-Extra-Clusternet-PrivateKey",
            HeaderValue::from_str(&key).unwrap(),
        );

        let base = Transport::tunneled(AlwaysConnected.dialer("c1")).unwrap();
        let injection = inject(
            &headers,
            &prefixes(),
            "c1",
            Some(base.clone()),
            &AlwaysConnected,
        )
        .unwrap();

        let transport = injection.transport.expect("certificate transport");
        assert!(transport.has_client_certificate());
        assert!(!transport.shares_config_with(&base));
        assert_eq!(transport.dialer().cluster_id(), "c1");
        assert!(injection.headers.is_empty());
    }

    #[test]
    fn test_multiple_prefixes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Impersonate-Extra-Clusternet-Token",
            HeaderValue::from_static("t2"),
        );
        let prefixes = vec![
            "X-Remote-Extra-".to_string(),
            "Impersonate-Extra-".to_string(),
        ];

        let injection = inject(&headers, &prefixes, "c1", None, &AlwaysConnected).unwrap();
        assert_eq!(injection.headers[AUTHORIZATION], "Bearer t2");
        assert_eq!(injection.headers.len(), 1);
    }
}
