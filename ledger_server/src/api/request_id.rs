//! Request ID propagation.
//!
//! Every request runs inside a `request` span carrying its id, so the ledger's
//! own log lines for a payment or release can be matched to the HTTP call
//! that caused them. The id is echoed back in `x-request-id`.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied id that is reused as is
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ID stored in request extensions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reuse the gateway's id when it is sane, otherwise mint one
fn request_id_from(headers: &HeaderMap) -> RequestId {
    let supplied = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });

    RequestId(supplied.map_or_else(|| Uuid::new_v4().to_string(), str::to_string))
}

/// Tag the request with an id and run it inside a span carrying it
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request_id_from(request.headers());
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id.as_str(),
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplied_id_reused() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("gw-7f3a.12"));
        assert_eq!(request_id_from(&headers).as_str(), "gw-7f3a.12");
    }

    #[test]
    fn test_missing_id_generated() {
        let id = request_id_from(&HeaderMap::new());
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_unsafe_id_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc def\"<script>"));
        assert!(Uuid::parse_str(request_id_from(&headers).as_str()).is_ok());

        let long = "a".repeat(MAX_REQUEST_ID_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert!(Uuid::parse_str(request_id_from(&headers).as_str()).is_ok());
    }
}
