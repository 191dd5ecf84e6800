//! Error responses in the Kubernetes `Status` shape

use crate::executor::{full, ProxyBody};
use exchange_core::{ErrorCategory, ExchangeError};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde_json::json;

pub fn status_code(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCategory::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCategory::BadGateway => StatusCode::BAD_GATEWAY,
    }
}

fn status_reason(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::BadRequest => "BadRequest",
        ErrorCategory::ServiceUnavailable => "ServiceUnavailable",
        ErrorCategory::InternalError => "InternalError",
        ErrorCategory::BadGateway => "BadGateway",
    }
}

/// Render an exchange error as a `Status` JSON response
pub fn error_response(error: &ExchangeError) -> Response<ProxyBody> {
    let category = error.category();
    let code = status_code(category);
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": error.to_string(),
        "reason": status_reason(category),
        "code": code.as_u16(),
    });

    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
