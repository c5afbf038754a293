use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{Level, Span};
use url::Url;

pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A request as seen by the mock server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,

    /// `Value::Null` for requests without a JSON body.
    pub body: Value,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|it| it.to_str().ok())
            .map(str::to_owned)
    }
}

/// Answers every request with a scripted `(status, json)` per method and path, recording what
/// it received. Unscripted routes answer 404.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    replies: Arc<Mutex<HashMap<(Method, String), (StatusCode, Value)>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockServer {
    pub fn reply(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.replies
            .lock()
            .unwrap()
            .insert((method, path.to_owned()), (status, body));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn single_request(&self) -> Recorded {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one request, got {requests:?}");
        requests[0].clone()
    }

    /// Serves on a random local port. The server stops when the returned guard is dropped.
    pub async fn start(&self) -> (Url, AbortOnDrop<()>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("TcpListener");
        let addr = listener.local_addr().expect("local address");
        let router = Router::new()
            .fallback(record)
            .with_state(self.clone())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(
                        DefaultMakeSpan::new()
                            .level(Level::DEBUG)
                            .include_headers(false),
                    )
                    .on_response(|response: &Response, latency: Duration, _span: &Span| {
                        tracing::debug!(
                            status = response.status().as_u16(),
                            latency = format_args!("{} ms", latency.as_millis()),
                            "response"
                        );
                    }),
            );

        let server_jh = tokio::spawn(async move {
            tracing::info!("Serving mock server...");
            axum::serve(listener, router)
                .await
                .expect("Server to start successfully");
        });

        let url = Url::parse(&format!("http://{addr}/")).expect("valid url");
        (url, AbortOnDrop(server_jh))
    }
}

async fn record(
    State(mock): State<MockServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query = uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_owned();

    mock.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query,
        headers,
        body,
    });

    let reply = mock.replies.lock().unwrap().get(&(method, path)).cloned();
    match reply {
        Some((status, body)) => (status, Json(body)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
