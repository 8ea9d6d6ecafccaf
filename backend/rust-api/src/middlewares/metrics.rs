use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

const UNMATCHED_ROUTE: &str = "unmatched";

/// Records request count and latency per route template, so level and
/// chapter ids never become label values.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = route_label(
        req.extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str),
    );

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &route, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &route])
        .observe(duration);

    response
}

fn route_label(matched: Option<&str>) -> String {
    match matched {
        Some(template) if !template.is_empty() => template.to_string(),
        _ => UNMATCHED_ROUTE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_route_template() {
        assert_eq!(
            route_label(Some("/api/levels/{level_id}/chapters")),
            "/api/levels/{level_id}/chapters"
        );
    }

    #[test]
    fn unknown_routes_share_one_label() {
        assert_eq!(route_label(None), UNMATCHED_ROUTE);
        assert_eq!(route_label(Some("")), UNMATCHED_ROUTE);
    }
}
