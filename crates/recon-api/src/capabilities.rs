//! Caller capabilities, as set by the gateway in front of the API.

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use recon_core::Capabilities;

pub const CAN_WRITE_HEADER: &str = "x-recon-can-write";
pub const CAN_VIEW_QUEUE_HEADER: &str = "x-recon-can-view-queue";

fn flag(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true")
        })
        .unwrap_or(false)
}

pub fn from_headers(headers: &HeaderMap) -> Capabilities {
    Capabilities {
        may_write: flag(headers, CAN_WRITE_HEADER),
        may_view_queue: flag(headers, CAN_VIEW_QUEUE_HEADER),
    }
}

/// Extractor for [`Capabilities`]. Missing headers grant nothing.
#[derive(Debug, Clone, Copy)]
pub struct Caps(pub Capabilities);

#[async_trait]
impl<S> FromRequestParts<S> for Caps
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caps(from_headers(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_missing_headers_grant_nothing() {
        assert_eq!(from_headers(&HeaderMap::new()), Capabilities::default());
    }

    #[test]
    fn test_header_values() {
        let mut headers = HeaderMap::new();
        headers.insert(CAN_WRITE_HEADER, HeaderValue::from_static("TRUE"));
        headers.insert(CAN_VIEW_QUEUE_HEADER, HeaderValue::from_static("yes"));
        let caps = from_headers(&headers);
        assert!(caps.may_write);
        assert!(!caps.may_view_queue);

        headers.insert(CAN_VIEW_QUEUE_HEADER, HeaderValue::from_static("1"));
        assert!(from_headers(&headers).may_view_queue);
    }
}
