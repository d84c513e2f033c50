//! Static file serving from a virtual host's document root.
//!
//! # Responsibilities
//! - Map a request path onto the document root without escaping it
//! - Serve files (streamed), directory index files and slash redirects
//! - Conditional GET via `If-Modified-Since`
//!
//! # Design Decisions
//! - Lexical normalisation first (no filesystem access for `..` checks),
//!   then canonicalisation to catch symlinks pointing outside the root
//! - File handles live in the response body and close when it is dropped

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use percent_encoding::percent_decode_str;
use tokio_util::io::ReaderStream;

use crate::http::response;

/// Why a request path cannot be mapped into the document root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path escapes the document root")]
    Traversal,
    #[error("malformed request path")]
    Malformed,
}

/// Failures while serving static content.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("method not allowed for static content")]
    MethodNotAllowed,

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("{} resolves outside the document root", .0.display())]
    OutsideRoot(PathBuf),

    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("{} has no index file", .0.display())]
    NoIndex(PathBuf),

    #[error("{} is not readable", .0.display())]
    Forbidden(PathBuf),

    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileError {
    pub fn status(&self) -> StatusCode {
        match self {
            FileError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            FileError::Path(PathError::Malformed) => StatusCode::BAD_REQUEST,
            FileError::Path(PathError::Traversal)
            | FileError::OutsideRoot(_)
            | FileError::NoIndex(_)
            | FileError::Forbidden(_) => StatusCode::FORBIDDEN,
            FileError::NotFound(_) => StatusCode::NOT_FOUND,
            FileError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure belongs in the error log (not just the access log).
    pub fn is_server_error(&self) -> bool {
        matches!(self, FileError::Io { .. })
    }

    pub fn into_response(self) -> Response {
        match self {
            FileError::MethodNotAllowed => response::method_not_allowed(),
            other => response::status_page(other.status()),
        }
    }
}

/// Lexically map `request_path` (percent-encoded, query stripped) onto `root`.
///
/// `.` segments and empty segments are dropped; `..` pops a segment and is
/// rejected when nothing is left to pop.
pub fn resolve_path(root: &Path, request_path: &str) -> Result<PathBuf, PathError> {
    if !request_path.starts_with('/') {
        return Err(PathError::Malformed);
    }

    let decoded = percent_decode_str(request_path)
        .decode_utf8()
        .map_err(|_| PathError::Malformed)?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return Err(PathError::Malformed);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::Traversal);
                }
            }
            name => segments.push(name),
        }
    }

    let mut path = root.to_path_buf();
    path.extend(segments);
    Ok(path)
}

fn io_error(path: &Path, source: io::Error) -> FileError {
    match source.kind() {
        io::ErrorKind::NotFound => FileError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => FileError::Forbidden(path.to_path_buf()),
        _ => FileError::Io {
            path: path.to_path_buf(),
            source,
        },
    }
}

/// `true` when some ancestor of `target` below `root` is a regular file,
/// as in `/index.html/extra`.
async fn below_a_file(root: &Path, target: &Path) -> bool {
    for ancestor in target.ancestors().skip(1) {
        if ancestor == root || !ancestor.starts_with(root) {
            break;
        }
        if let Ok(meta) = tokio::fs::metadata(ancestor).await {
            return !meta.is_dir();
        }
    }
    false
}

/// Location for a directory requested without its trailing slash.
///
/// Built from the normalised segments so the result always starts with a
/// single `/`; the query string is carried over.
fn directory_location(request_path: &str, query: Option<&str>) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    let mut location = String::from("/");
    for segment in segments {
        location.push_str(segment);
        location.push('/');
    }
    if let Some(query) = query {
        location.push('?');
        location.push_str(query);
    }
    location
}

/// Serve `target` (path with optional `?query`) from `root`.
pub async fn serve(
    root: &Path,
    index_files: &[String],
    method: &Method,
    target: &str,
    headers: &HeaderMap,
) -> Result<Response, FileError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(FileError::MethodNotAllowed);
    }

    let (request_path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    let target = resolve_path(root, request_path)?;
    let canonical_root = tokio::fs::canonicalize(root).await.map_err(|source| FileError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let canonical = match tokio::fs::canonicalize(&target).await {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FileError::NotFound(target)),
        Err(e) if below_a_file(root, &target).await => {
            tracing::trace!(path = %target.display(), error = %e, "Path continues below a file");
            return Err(FileError::NotFound(target));
        }
        Err(e) => return Err(io_error(&target, e)),
    };
    if !canonical.starts_with(&canonical_root) {
        return Err(FileError::OutsideRoot(target));
    }

    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|e| io_error(&canonical, e))?;

    if !metadata.is_dir() {
        return send_file(&canonical, metadata, method, headers).await;
    }

    if !request_path.ends_with('/') {
        return Ok(response::moved_permanently(&directory_location(request_path, query)));
    }

    for index in index_files {
        let candidate = canonical.join(index);
        let Ok(resolved) = tokio::fs::canonicalize(&candidate).await else {
            continue;
        };
        if !resolved.starts_with(&canonical_root) {
            return Err(FileError::OutsideRoot(candidate));
        }
        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.is_file() => return send_file(&resolved, meta, method, headers).await,
            Ok(_) => continue,
            Err(e) => return Err(io_error(&resolved, e)),
        }
    }

    Err(FileError::NoIndex(target))
}

fn not_modified_since(modified: SystemTime, headers: &HeaderMap) -> bool {
    let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok())
    else {
        return false;
    };
    // HTTP dates have one-second resolution.
    let seconds = |time: SystemTime| {
        time.duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    };
    seconds(modified) <= seconds(since)
}

async fn send_file(
    path: &Path,
    metadata: std::fs::Metadata,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Response, FileError> {
    let modified = metadata.modified().ok();
    let last_modified = modified
        .and_then(|time| HeaderValue::from_str(&httpdate::fmt_http_date(time)).ok());

    if let Some(time) = modified {
        if not_modified_since(time, headers) {
            return Ok(response::not_modified(last_modified));
        }
    }

    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let file = tokio::fs::File::open(path).await.map_err(|e| io_error(path, e))?;
        Body::from_stream(ReaderStream::new(file))
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_LENGTH, metadata.len());
    if let Some(value) = last_modified {
        builder = builder.header(header::LAST_MODIFIED, value);
    }

    builder.body(body).map_err(|e| FileError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })
}
