//! API documentation endpoints: the OpenAPI document and a Swagger UI
//! shell. These are the only routes that carry cache headers.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use crate::SharedState;

const OPENAPI_YAML: &str = include_str!("openapi.yaml");

const SWAGGER_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>Arx API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    SwaggerUIBundle({ url: "/api/v1/openapi.yaml", dom_id: "#swagger-ui" });
  </script>
</body>
</html>
"##;

pub async fn openapi(State(state): State<SharedState>) -> impl IntoResponse {
    if !state.config.server.http.swagger_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [
            (header::CONTENT_TYPE, "application/yaml"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        OPENAPI_YAML,
    )
        .into_response()
}

pub async fn swagger(State(state): State<SharedState>) -> impl IntoResponse {
    if !state.config.server.http.swagger_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        SWAGGER_HTML,
    )
        .into_response()
}
