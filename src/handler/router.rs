//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: route lookup, method checks and
//! dispatch to the route handlers. Handler errors are turned into responses here.

use crate::config::AppState;
use crate::error::{BoxError, HandlerError};
use crate::handler::{deserialize, execute, status, upload};
use crate::http::{self, QueryParams};
use crate::logger::{self, AccessLogEntry};
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, REFERER, SERVER, USER_AGENT};
use hyper::{Method, Request, Response, Version};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Registered routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Health,
    Metrics,
    Execute,
    Deserialize,
    Upload,
}

impl Route {
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Self::Health),
            "/metrics" => Some(Self::Metrics),
            "/execute" => Some(Self::Execute),
            "/deserialize" => Some(Self::Deserialize),
            "/upload" => Some(Self::Upload),
            _ => None,
        }
    }

    /// Value of the `Allow` header for this route
    pub const fn allow(self) -> &'static str {
        match self {
            Self::Upload => "OPTIONS, POST",
            _ => "GET, HEAD, OPTIONS",
        }
    }

    pub fn accepts(self, method: &Method) -> bool {
        match self {
            Self::Upload => *method == Method::POST,
            _ => *method == Method::GET || *method == Method::HEAD,
        }
    }
}

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();
    let access_log = state.config.logging.access_log;

    let mut entry = access_log.then(|| {
        let mut entry = AccessLogEntry::new(
            peer_addr.ip().to_string(),
            req.method().to_string(),
            req.uri().path().to_string(),
        );
        entry.query = req.uri().query().map(ToString::to_string);
        entry.http_version = version_label(req.version()).to_string();
        entry.referer = header_string(req.headers(), REFERER.as_str());
        entry.user_agent = header_string(req.headers(), USER_AGENT.as_str());
        entry
    });

    let mut response = route_request(req, &state).await;
    if let Ok(server) = HeaderValue::from_str(&state.config.http.server_name) {
        response.headers_mut().insert(SERVER, server);
    }

    if let Some(entry) = entry.as_mut() {
        entry.status = response.status().as_u16();
        entry.body_bytes = response.body().size_hint().exact().unwrap_or(0);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

/// Look up the route, check the method and dispatch
async fn route_request<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let Some(route) = Route::from_path(req.uri().path()) else {
        return http::build_404_response();
    };

    if req.method() == Method::OPTIONS {
        return http::build_options_response(route.allow());
    }
    if !route.accepts(req.method()) {
        logger::log_warning(&format!(
            "Method not allowed: {} {}",
            req.method(),
            req.uri().path()
        ));
        return http::build_405_response(route.allow());
    }

    if let Some(resp) = check_body_size(req.headers(), state.config.http.max_body_size) {
        return resp;
    }

    let is_head = req.method() == Method::HEAD;
    let (parts, body) = req.into_parts();
    let query = QueryParams::parse(parts.uri.query());

    let result = match route {
        Route::Health => Ok(status::health(state)),
        Route::Metrics => Ok(status::metrics(state)),
        Route::Execute => execute::execute(&query, state).await,
        Route::Deserialize => deserialize::deserialize(&query, state),
        Route::Upload => upload::upload(&parts.headers, body, state).await,
    };

    let response = result.unwrap_or_else(|err| error_response(route, &err));
    if is_head {
        http::strip_body(response)
    } else {
        response
    }
}

fn error_response(route: Route, err: &HandlerError) -> Response<Full<Bytes>> {
    logger::log_error(&format!("{route:?} handler failed: {err}"));
    http::build_error_response(err.status(), &err.to_string())
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size(headers: &HeaderMap, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = headers.get(CONTENT_LENGTH)?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_error(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response())
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

const fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::exec::{ExecError, ShellRunner};
    use crate::reconstruct::{StrictPickle, UnrestrictedPickle};
    use async_trait::async_trait;
    use http_body_util::{BodyExt, StreamBody};
    use hyper::body::Frame;
    use hyper::StatusCode;
    use std::sync::Mutex;

    /// Records commands instead of running them
    #[derive(Default)]
    struct RecordingShell {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ShellRunner for RecordingShell {
        async fn run(&self, command: &str) -> Result<Vec<u8>, ExecError> {
            self.commands.lock().unwrap().push(command.to_string());
            if command == "false" {
                return Err(ExecError::Spawn(std::io::Error::other("simulated failure")));
            }
            Ok(format!("ran: {command}\n").into_bytes())
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn state_with(shell: Arc<RecordingShell>, upload_dir: &str) -> Arc<AppState> {
        let mut cfg = test_config();
        cfg.upload.dir = upload_dir.to_string();
        Arc::new(AppState::with_capabilities(
            &cfg,
            shell,
            Arc::new(UnrestrictedPickle),
        ))
    }

    fn test_state() -> Arc<AppState> {
        state_with(Arc::new(RecordingShell::default()), "/tmp")
    }

    async fn send(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap();
        into_parts(handle_request(req, Arc::clone(state), peer()).await.unwrap()).await
    }

    async fn into_parts(resp: Response<Full<Bytes>>) -> (StatusCode, HeaderMap, Bytes) {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body)
    }

    fn multipart_body(field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
        let disposition = match filename {
            Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
            None => format!("form-data; name=\"{field}\""),
        };
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUNDARY\r\n");
        body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n--BOUNDARY--\r\n");
        body
    }

    fn upload_request<B>(body: B) -> Request<B> {
        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header("Content-Type", "multipart/form-data; boundary=BOUNDARY")
            .body(body)
            .unwrap()
    }

    fn multipart_request(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Full<Bytes>> {
        let body = multipart_body(field, filename, data);
        upload_request(Full::new(Bytes::from(body)))
    }

    /// Request body sent in `chunk`-sized frames with no Content-Length
    fn chunked_upload(body: &[u8], chunk: usize) -> Request<impl Body<Data = Bytes, Error = Infallible>> {
        let frames: Vec<Result<Frame<Bytes>, Infallible>> = body
            .chunks(chunk)
            .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
            .collect();
        upload_request(StreamBody::new(futures::stream::iter(frames)))
    }

    #[tokio::test]
    async fn test_health_counts_every_call() {
        let state = test_state();
        for n in 1..=5u64 {
            let (status, headers, body) = send(&state, Method::GET, "/").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers["Content-Type"], "application/json");
            assert_eq!(headers["Server"], "scanbait-test");
            assert_eq!(&body[..], br#"{"status": "OK"}"#);
            assert_eq!(state.requests.get(), n);
        }
    }

    #[tokio::test]
    async fn test_metrics_exposes_counter() {
        let state = test_state();
        let (_, _, body) = send(&state, Method::GET, "/metrics").await;
        assert!(String::from_utf8_lossy(&body).contains("http_requests_total 0"));

        for _ in 0..3 {
            send(&state, Method::GET, "/").await;
        }
        let (status, headers, body) = send(&state, Method::GET, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["Content-Type"], crate::metrics::CONTENT_TYPE);
        assert!(String::from_utf8_lossy(&body).contains("http_requests_total 3"));
    }

    #[tokio::test]
    async fn test_metrics_does_not_count() {
        let state = test_state();
        send(&state, Method::GET, "/metrics").await;
        send(&state, Method::GET, "/execute?cmd=id").await;
        assert_eq!(state.requests.get(), 0);
    }

    #[tokio::test]
    async fn test_execute_passes_raw_command() {
        let shell = Arc::new(RecordingShell::default());
        let state = state_with(Arc::clone(&shell), "/tmp");
        let (status, _, body) = send(&state, Method::GET, "/execute?cmd=cat%20/etc/passwd;%20id").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ran: cat /etc/passwd; id\n");
        assert_eq!(*shell.commands.lock().unwrap(), vec!["cat /etc/passwd; id"]);
    }

    #[tokio::test]
    async fn test_execute_without_cmd_fails() {
        let shell = Arc::new(RecordingShell::default());
        let state = state_with(Arc::clone(&shell), "/tmp");
        let (status, _, _) = send(&state, Method::GET, "/execute").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(shell.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_failure_is_500() {
        let state = test_state();
        let (status, _, _) = send(&state, Method::GET, "/execute?cmd=false").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_with_system_shell() {
        let state = Arc::new(AppState::new(&test_config()));
        let (status, _, body) = send(&state, Method::GET, "/execute?cmd=echo%20test").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"test\n");
    }

    #[tokio::test]
    async fn test_deserialize_integer() {
        let state = test_state();
        let (status, _, body) = send(&state, Method::GET, "/deserialize?data=I42%0A.").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"42");
    }

    #[tokio::test]
    async fn test_deserialize_rejects_garbage() {
        let state = test_state();
        let (status, _, body) = send(&state, Method::GET, "/deserialize?data=not-valid-bytes").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8_lossy(&body).starts_with("deserialization failed"));

        let (status, _, _) = send(&state, Method::GET, "/deserialize").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_deeply_nested_payload_is_500() {
        let state = test_state();
        let depth = 5000;
        let uri = format!(
            "/deserialize?data={}{}.",
            "(".repeat(depth),
            "l".repeat(depth)
        );
        let (status, _, body) = send(&state, Method::GET, &uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8_lossy(&body).starts_with("deserialization failed"));

        let (status, _, _) = send(&state, Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reconstructor_is_swappable() {
        let payload = "/deserialize?data=c__main__%0AEvil%0Ap0%0A(tRp1%0A.";

        let (status, _, body) = send(&test_state(), Method::GET, payload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"None");

        let strict = Arc::new(AppState::with_capabilities(
            &test_config(),
            Arc::new(RecordingShell::default()),
            Arc::new(StrictPickle),
        ));
        let (status, _, _) = send(&strict, Method::GET, payload).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_upload_traversal_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(
            Arc::new(RecordingShell::default()),
            dir.path().to_str().unwrap(),
        );

        let req = multipart_request("file", Some("../../etc/passwd"), b"root:x:0:0");
        let resp = handle_request(req, Arc::clone(&state), peer()).await.unwrap();
        let (status, _, body) = into_parts(resp).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"File uploaded!");
        let stored = dir.path().join("etc_passwd");
        assert_eq!(std::fs::read(stored).unwrap(), b"root:x:0:0");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_file_part_is_400() {
        let state = test_state();

        let req = multipart_request("other", Some("a.txt"), b"x");
        let (status, _, _) = into_parts(handle_request(req, Arc::clone(&state), peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = multipart_request("file", None, b"x");
        let (status, _, _) = into_parts(handle_request(req, Arc::clone(&state), peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&state, Method::POST, "/upload").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_empty_sanitized_name_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(
            Arc::new(RecordingShell::default()),
            dir.path().to_str().unwrap(),
        );
        let req = multipart_request("file", Some("../.."), b"x");
        let (status, _, _) = into_parts(handle_request(req, state, peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_chunked_upload_respects_body_limit() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(
            Arc::new(RecordingShell::default()),
            dir.path().to_str().unwrap(),
        );

        let small = multipart_body("file", Some("small.bin"), &[b'a'; 100]);
        let req = chunked_upload(&small, 64);
        let (status, _, _) = into_parts(handle_request(req, Arc::clone(&state), peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(std::fs::read(dir.path().join("small.bin")).unwrap().len(), 100);

        // 64 KiB against the 1 KiB test limit
        let big = multipart_body("file", Some("big.bin"), &vec![b'b'; 64 * 1024]);
        let req = chunked_upload(&big, 4096);
        let (status, _, _) = into_parts(handle_request(req, state, peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!dir.path().join("big.bin").exists());
    }

    #[tokio::test]
    async fn test_method_and_path_checks() {
        let state = test_state();

        let (status, _, _) = send(&state, Method::GET, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, headers, _) = send(&state, Method::GET, "/upload").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers["Allow"], "OPTIONS, POST");

        let (status, _, _) = send(&state, Method::POST, "/execute?cmd=id").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, headers, _) = send(&state, Method::OPTIONS, "/metrics").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers["Allow"], "GET, HEAD, OPTIONS");
    }

    #[tokio::test]
    async fn test_head_drops_body() {
        let state = test_state();
        let (status, _, body) = send(&state, Method::HEAD, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(state.requests.get(), 1);
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let state = test_state();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header("Content-Length", "999999")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (status, _, _) = into_parts(handle_request(req, state, peer()).await.unwrap()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_route_table() {
        assert_eq!(Route::from_path("/"), Some(Route::Health));
        assert_eq!(Route::from_path("/execute/"), None);
        assert!(Route::Upload.accepts(&Method::POST));
        assert!(!Route::Upload.accepts(&Method::GET));
        assert!(Route::Deserialize.accepts(&Method::HEAD));
    }
}
