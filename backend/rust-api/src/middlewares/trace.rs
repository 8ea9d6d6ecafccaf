use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
const MAX_TRACE_ID_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct RequestTraceContext {
    pub trace_id: String,
}

/// Trace id sent by the client, if it is safe to echo back.
fn incoming_trace_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(TRACE_ID_HEADER)?.to_str().ok()?.trim();
    let valid = !value.is_empty()
        && value.len() <= MAX_TRACE_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| value.to_string())
}

/// Gives every request a trace id, runs it inside a span carrying that id
/// and returns the id in the response headers.
pub async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let trace_id =
        incoming_trace_id(request.headers()).unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestTraceContext {
        trace_id: trace_id.clone(),
    });

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path()
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn keeps_well_formed_client_id() {
        assert_eq!(
            incoming_trace_id(&headers("req-42_a")).as_deref(),
            Some("req-42_a")
        );
    }

    #[test]
    fn rejects_suspicious_client_id() {
        assert!(incoming_trace_id(&headers("a b")).is_none());
        assert!(incoming_trace_id(&headers(&"x".repeat(65))).is_none());
        assert!(incoming_trace_id(&HeaderMap::new()).is_none());
    }
}
