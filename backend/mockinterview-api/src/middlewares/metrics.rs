use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use crate::utils::token::looks_like_session_token;

/// Records request count and latency per method, normalized path and status.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Replaces session tokens and other ids in the path with `{id}` to keep
/// label cardinality bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if looks_like_session_token(segment) || is_uuid_like(segment) || is_numeric_id(segment)
            {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/mockinterview/1718000000123456-abcde12345"),
            "/api/v1/mockinterview/{id}"
        );
        assert_eq!(
            normalize_path("/api/v1/mockinterview/1718000000123456-abcde12345/complete"),
            "/api/v1/mockinterview/{id}/complete"
        );
        assert_eq!(
            normalize_path("/api/v1/mockinterview/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/mockinterview/{id}"
        );
        assert_eq!(normalize_path("/api/v1/mockinterview"), "/api/v1/mockinterview");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_id_detection() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
        assert!(is_numeric_id("123"));
        assert!(!is_numeric_id(""));
    }
}
