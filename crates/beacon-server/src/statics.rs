//! Static file responder: bytes, MIME types, and no-cache headers.

use std::io;
use std::path::{Component, Path, PathBuf};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Resolve a URL path beneath `root`, or `None` when it contains anything
/// but plain names (no `..`, no root grafting).
fn resolve(root: &Path, url_path: &str) -> Option<PathBuf> {
    let trimmed = url_path.trim_start_matches('/');
    let relative = if trimmed.is_empty() { "index.html" } else { trimmed };

    let candidate = Path::new(relative);
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(root.join(candidate))
}

/// Content-Type for a served file. Mirrors the types a dashboard actually
/// ships; anything else goes out as opaque bytes.
fn content_type(path: &Path) -> mime::Mime {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => mime::TEXT_HTML_UTF_8,
        "css" => mime::TEXT_CSS,
        "js" | "mjs" => mime::APPLICATION_JAVASCRIPT,
        "json" => mime::APPLICATION_JSON,
        "svg" => mime::IMAGE_SVG,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "pdf" => mime::APPLICATION_PDF,
        "txt" | "md" | "csv" => mime::TEXT_PLAIN_UTF_8,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

/// Serve one file from beneath `root`. Browsers must always refetch, so
/// every success carries the full no-cache header set.
pub async fn serve(root: &Path, url_path: &str) -> Response {
    let Some(path) = resolve(root, url_path) else {
        tracing::debug!(path = url_path, "Rejected unsafe path");
        return not_found();
    };

    // A directory request means its index page.
    let path = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => path.join("index.html"),
        _ => path,
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let ct = content_type(&path);
            (
                [
                    (header::CONTENT_TYPE, ct.as_ref()),
                    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                    (header::PRAGMA, "no-cache"),
                    (header::EXPIRES, "0"),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => not_found(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Failed to read file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
