#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Mock backend that answers every request with a fixed status and its own
/// name, and records `{METHOD /path body}` for everything it sees. Requests
/// arriving without the duplication marker are recorded with a prefix so
/// expectations catch them.
pub struct Backend {
    pub name: &'static str,
    pub url: String,
    seen: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl Backend {
    pub async fn start(name: &'static str, status: StatusCode) -> Backend {
        Backend::start_with_delay(name, status, Duration::ZERO).await
    }

    pub async fn start_with_delay(
        name: &'static str,
        status: StatusCode,
        delay: Duration,
    ) -> Backend {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
        let addr = listener.local_addr().expect("backend addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(run(listener, name, status, delay, Arc::clone(&seen)));

        Backend {
            name,
            url: format!("http://{}", addr),
            seen,
            task,
        }
    }

    pub async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }

    /// Waits for exactly the given request set to arrive (order-insensitive),
    /// then forgets it. An empty set asserts that nothing shows up.
    pub async fn expect(&self, expected: &[&str]) {
        let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        want.sort();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let mut got = self.seen.lock().await.clone();
            got.sort();

            if got == want {
                // Linger so late extras still get caught.
                tokio::time::sleep(Duration::from_millis(60)).await;
                let mut got = self.seen.lock().await.clone();
                got.sort();
                assert_eq!(got, want, "backend {}", self.name);
                self.seen.lock().await.clear();
                return;
            }

            if Instant::now() > deadline {
                assert_eq!(got, want, "backend {}", self.name);
                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    listener: TcpListener,
    name: &'static str,
    status: StatusCode,
    delay: Duration,
    seen: Arc<Mutex<Vec<String>>>,
) {
    loop {
        let (stream, _remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => break,
        };

        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let seen = Arc::clone(&seen);
                async move {
                    let (parts, body) = request.into_parts();
                    let body = body.collect().await.expect("backend body").to_bytes();

                    let marker = if parts.headers.contains_key(nfork::NFORK_HEADER) {
                        ""
                    } else {
                        "missing-x-nfork "
                    };
                    let target = parts
                        .uri
                        .path_and_query()
                        .map(|pq| pq.as_str().to_string())
                        .unwrap_or_else(|| parts.uri.path().to_string());
                    seen.lock().await.push(format!(
                        "{}{{{} {} {}}}",
                        marker,
                        parts.method,
                        target,
                        String::from_utf8_lossy(&body)
                    ));

                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }

                    Response::builder()
                        .status(status)
                        .header("x-test", "true")
                        .body(Full::new(Bytes::from_static(name.as_bytes())))
                }
            });

            let _ = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
        });
    }
}

pub fn url_for(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}

/// Sends one request and returns status, headers and body text.
pub async fn send(
    base: &str,
    method: Method,
    path: &str,
    body: &str,
) -> (StatusCode, HeaderMap, String) {
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();

    let request = Request::builder()
        .method(method)
        .uri(format!("{}{}", base, path))
        .header("x-test", "true")
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("build request");

    let response = client.request(request).await.expect("send request");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("response body")
        .to_bytes();

    (status, headers, String::from_utf8_lossy(&body).to_string())
}
