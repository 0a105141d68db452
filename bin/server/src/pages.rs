//! Minimal HTML pages rendered by the gateway itself.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// Renders a plain error page. Both strings are HTML-escaped.
pub fn error_page(status: StatusCode, heading: &str, detail: &str) -> Response {
    let title = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{} {}</title></head>\n<body>\n<h1>{}</h1>\n<p>{}</p>\n</body>\n</html>\n",
        status.as_u16(),
        title,
        html_escape::encode_text(heading),
        html_escape::encode_text(detail),
    );
    (status, Html(body)).into_response()
}

/// Renders the page shown when an identity provider or backend redirects
/// back with an `error` query parameter.
pub fn upstream_error(error: &str, description: Option<&str>) -> Response {
    let detail = description.filter(|d| !d.is_empty()).unwrap_or(error);
    error_page(
        StatusCode::BAD_REQUEST,
        &format!("Sign-in failed: {error}"),
        detail,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    #[tokio::test]
    async fn upstream_error_escapes_parameters() {
        let response = upstream_error("<b>denied</b>", Some("user said \"no\" & left"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_text(response).await;
        assert!(body.contains("&lt;b&gt;denied&lt;/b&gt;"));
        assert!(body.contains("user said \"no\" &amp; left"));
        assert!(!body.contains("<b>"));
    }

    #[tokio::test]
    async fn upstream_error_falls_back_to_error_code() {
        let body = body_text(upstream_error("access_denied", Some(""))).await;
        assert!(body.contains("<p>access_denied</p>"));
    }
}
