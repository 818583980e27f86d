//! In-process HTTP server standing in for the radar archive.
//!
//! Routes are matched against the request path, exact matches first and
//! then suffix matches, so a test can serve a station directory without
//! knowing the date the client will ask for:
//!
//! ```ignore
//! let archive = MockArchive::builder()
//!     .station_listing("KTLX", &["file1.ar2v", "file2.ar2v"])
//!     .station_file("KTLX", "file2.ar2v", "data")
//!     .start()
//!     .await;
//! ```
//!
//! Unmatched paths answer 404.
//!
//! Objects added with [`MockArchiveBuilder::bucket_object`] are also listed
//! through the bucket API: a request carrying `list-type=2` answers with a
//! `ListBucketResult` document filtered by `prefix`, paged by
//! [`MockArchiveBuilder::bucket_page_size`].

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the server sends for a matched path.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// 200 with an HTML body.
    Html(String),
    /// 200 with a binary body.
    File(Bytes),
    /// Bare status with an empty body.
    Status(u16),
    /// 200 that sends `prefix` and then aborts the body stream.
    Truncated(Bytes),
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Suffix(String),
}

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Exact(p) => path == p,
            Matcher::Suffix(s) => path.ends_with(s.as_str()),
        }
    }
}

/// A request the server received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Option<String>,
    pub user_agent: Option<String>,
}

const DEFAULT_BUCKET_PAGE_SIZE: usize = 1000;

struct ArchiveState {
    routes: Vec<(Matcher, MockResponse)>,
    bucket_keys: BTreeSet<String>,
    bucket_page_size: usize,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Builds a [`MockArchive`].
pub struct MockArchiveBuilder {
    routes: Vec<(Matcher, MockResponse)>,
    bucket_keys: BTreeSet<String>,
    bucket_page_size: usize,
}

impl Default for MockArchiveBuilder {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            bucket_keys: BTreeSet::new(),
            bucket_page_size: DEFAULT_BUCKET_PAGE_SIZE,
        }
    }
}

impl MockArchiveBuilder {
    /// Serve `response` at exactly `path`.
    pub fn route(mut self, path: &str, response: MockResponse) -> Self {
        self.routes.push((Matcher::Exact(path.to_string()), response));
        self
    }

    /// Serve `response` at any path ending in `suffix`.
    pub fn route_suffix(mut self, suffix: &str, response: MockResponse) -> Self {
        self.routes
            .push((Matcher::Suffix(suffix.to_string()), response));
        self
    }

    /// Directory listing for `station` on any date.
    pub fn station_listing(self, station: &str, names: &[&str]) -> Self {
        let html = listing_html(names);
        self.route_suffix(&format!("/{station}/"), MockResponse::Html(html))
    }

    /// Raw HTML listing for `station` on any date.
    pub fn station_listing_html(self, station: &str, html: &str) -> Self {
        self.route_suffix(&format!("/{station}/"), MockResponse::Html(html.to_string()))
    }

    /// Status-only response for the `station` directory.
    pub fn station_status(self, station: &str, status: u16) -> Self {
        self.route_suffix(&format!("/{station}/"), MockResponse::Status(status))
    }

    /// File body under the `station` directory on any date.
    pub fn station_file(self, station: &str, name: &str, body: impl Into<Bytes>) -> Self {
        self.route_suffix(
            &format!("/{station}/{name}"),
            MockResponse::File(body.into()),
        )
    }

    /// Bucket object at `key` (no leading slash), listed by the bucket API
    /// and served at `/{key}`.
    pub fn bucket_object(mut self, key: &str, body: impl Into<Bytes>) -> Self {
        self.bucket_keys.insert(key.to_string());
        self.route(&format!("/{key}"), MockResponse::File(body.into()))
    }

    /// Maximum keys per bucket listing page.
    pub fn bucket_page_size(mut self, size: usize) -> Self {
        self.bucket_page_size = size.max(1);
        self
    }

    /// Start serving on an ephemeral localhost port.
    pub async fn start(self) -> MockArchive {
        let state = Arc::new(ArchiveState {
            routes: self.routes,
            bucket_keys: self.bucket_keys,
            bucket_page_size: self.bucket_page_size,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock archive listener");
        let addr = listener
            .local_addr()
            .expect("Mock archive listener has no address");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockArchive {
            addr,
            state,
            handle,
        }
    }
}

/// A running mock archive. The server stops when this is dropped.
pub struct MockArchive {
    addr: SocketAddr,
    state: Arc<ArchiveState>,
    handle: JoinHandle<()>,
}

impl MockArchive {
    pub fn builder() -> MockArchiveBuilder {
        MockArchiveBuilder::default()
    }

    /// Base URL, e.g. `http://127.0.0.1:41234` (no trailing slash).
    pub fn root_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }
}

impl Drop for MockArchive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(State(state): State<Arc<ArchiveState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Ok(mut requests) = state.requests.lock() {
        requests.push(RecordedRequest {
            path: path.clone(),
            query: query.clone(),
            user_agent,
        });
    }

    if query.is_some() {
        let params = Query::<HashMap<String, String>>::try_from_uri(request.uri())
            .map(|Query(params)| params)
            .unwrap_or_default();
        if params.get("list-type").map(String::as_str) == Some("2") {
            return bucket_listing(&state, &params);
        }
    }

    let matched = state
        .routes
        .iter()
        .find(|(m, _)| matches!(m, Matcher::Exact(_)) && m.matches(&path))
        .or_else(|| state.routes.iter().find(|(m, _)| m.matches(&path)))
        .map(|(_, r)| r.clone());

    match matched {
        Some(MockResponse::Html(html)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response(),
        Some(MockResponse::File(body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            body,
        )
            .into_response(),
        Some(MockResponse::Status(code)) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Some(MockResponse::Truncated(prefix)) => {
            let chunks: Vec<Result<Bytes, io::Error>> = vec![
                Ok(prefix),
                Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "mock archive aborted the body",
                )),
            ];
            Response::new(Body::from_stream(futures::stream::iter(chunks)))
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn bucket_listing(state: &ArchiveState, params: &HashMap<String, String>) -> Response {
    let prefix = params.get("prefix").map(String::as_str).unwrap_or("");
    let start = match params.get("continuation-token") {
        Some(token) => match token.parse::<usize>() {
            Ok(start) => start,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        },
        None => 0,
    };

    let matching: Vec<&String> = state
        .bucket_keys
        .iter()
        .filter(|k| k.starts_with(prefix))
        .collect();
    let end = (start + state.bucket_page_size).min(matching.len());
    let page = matching.get(start..end).unwrap_or_default();
    let truncated = end < matching.len();

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\n",
    );
    xml.push_str("<Name>mock-archive</Name>\n");
    xml.push_str(&format!("<Prefix>{}</Prefix>\n", xml_escape(prefix)));
    xml.push_str(&format!("<KeyCount>{}</KeyCount>\n", page.len()));
    xml.push_str(&format!("<MaxKeys>{}</MaxKeys>\n", state.bucket_page_size));
    xml.push_str(&format!("<IsTruncated>{truncated}</IsTruncated>\n"));
    for key in page {
        xml.push_str(&format!(
            "<Contents><Key>{}</Key><Size>0</Size><StorageClass>STANDARD</StorageClass></Contents>\n",
            xml_escape(key)
        ));
    }
    if truncated {
        xml.push_str(&format!("<NextContinuationToken>{end}</NextContinuationToken>\n"));
    }
    xml.push_str("</ListBucketResult>\n");

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal directory index page linking each name.
pub fn listing_html(names: &[&str]) -> String {
    let mut html = String::from("<html><head><title>Index</title></head><body>\n");
    for name in names {
        html.push_str(&format!("<a href=\"{name}\">{name}</a><br>\n"));
    }
    html.push_str("</body></html>\n");
    html
}
