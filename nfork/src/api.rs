use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::InboundDescriptor;
use crate::controller::Controller;
use crate::error::{Error, Result};

/// Prefix under which every administrative route is mounted.
pub const API_PREFIX: &str = "/v1/nfork";

/// Dispatches one administrative request:
///
///   GET    /v1/nfork                            list inbounds
///   POST   /v1/nfork                            add inbound (descriptor body)
///   GET    /v1/nfork/stats                      stats for every inbound
///   GET    /v1/nfork/{inbound}                  one inbound
///   DELETE /v1/nfork/{inbound}                  remove inbound
///   GET    /v1/nfork/{inbound}/stats            stats for one inbound
///   PUT    /v1/nfork/{inbound}/{outbound}       add outbound (address body)
///   DELETE /v1/nfork/{inbound}/{outbound}       remove outbound
///   GET    /v1/nfork/{inbound}/{outbound}/stats stats for one outbound
///
/// Success payloads are JSON; administrative errors come back as plain text.
pub async fn handle(controller: &Controller, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => return text_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let path = parts.uri.path();
    let Some(tail) = path.strip_prefix(API_PREFIX) else {
        return text_response(StatusCode::NOT_FOUND, "not found");
    };
    if !tail.is_empty() && !tail.starts_with('/') {
        return text_response(StatusCode::NOT_FOUND, "not found");
    }
    let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();

    match (&parts.method, segments.as_slice()) {
        (&Method::GET, []) => json_response(&controller.list().await),

        (&Method::POST, []) => {
            let descriptor: InboundDescriptor = match serde_json::from_slice(&body) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    return text_response(
                        StatusCode::BAD_REQUEST,
                        &format!("invalid inbound descriptor: {}", err),
                    )
                }
            };
            reply_empty(controller.add_inbound(&descriptor).await)
        }

        (&Method::GET, ["stats"]) => json_response(&controller.read_stats().await),

        (&Method::GET, [inbound]) => reply_json(controller.list_inbound(inbound).await),

        (&Method::DELETE, [inbound]) => reply_empty(controller.remove_inbound(inbound).await),

        (&Method::GET, [inbound, "stats"]) => {
            reply_json(controller.read_inbound_stats(inbound).await)
        }

        (&Method::PUT, [inbound, outbound]) => match address_body(&body) {
            Ok(addr) => reply_empty(controller.add_outbound(inbound, outbound, &addr).await),
            Err(message) => text_response(StatusCode::BAD_REQUEST, &message),
        },

        (&Method::DELETE, [inbound, outbound]) => {
            reply_empty(controller.remove_outbound(inbound, outbound).await)
        }

        (&Method::GET, [inbound, outbound, "stats"]) => {
            reply_json(controller.read_outbound_stats(inbound, outbound).await)
        }

        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// The outbound address body: canonically a JSON string, raw text accepted.
fn address_body(body: &Bytes) -> std::result::Result<String, String> {
    if let Ok(addr) = serde_json::from_slice::<String>(body) {
        return Ok(addr);
    }
    match std::str::from_utf8(body) {
        Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err("missing outbound address".to_string()),
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::UnknownInbound(_) | Error::UnknownOutbound { .. } => StatusCode::NOT_FOUND,
        Error::InboundExists(_) => StatusCode::CONFLICT,
        Error::Validation(_) | Error::Config(_) | Error::RemoveActive { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply_json<T: Serialize>(result: Result<T>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => json_response(&value),
        Err(err) => error_response(&err),
    }
}

fn reply_empty(result: Result<()>) -> Response<Full<Bytes>> {
    match result {
        Ok(()) => Response::new(Full::new(Bytes::new())),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &Error) -> Response<Full<Bytes>> {
    debug!(error = %err, "admin request rejected");
    text_response(status_for(err), &err.to_string())
}

fn json_response<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Serves the administrative API on its own listener.
pub struct AdminServer {
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
}

impl AdminServer {
    pub async fn bind(listen: &str, controller: Arc<Controller>) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|source| Error::Bind {
                listen: listen.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let acceptor = tokio::spawn(async move {
            loop {
                let (stream, _remote) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "admin accept failed");
                        continue;
                    }
                };
                stream.set_nodelay(true).ok();

                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |request| {
                        let controller = Arc::clone(&controller);
                        async move { Ok::<_, Infallible>(handle(&controller, request).await) }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(error = %err, "admin connection closed");
                    }
                });
            }
        });

        info!(listen = %local_addr, "admin API listening");

        Ok(Self {
            local_addr,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn close(&self) {
        self.acceptor.abort();
    }
}

impl Drop for AdminServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_body_accepts_json_and_raw_text() {
        assert_eq!(
            address_body(&Bytes::from_static(b"\"localhost:8080\"")).unwrap(),
            "localhost:8080"
        );
        assert_eq!(
            address_body(&Bytes::from_static(b"localhost:8080")).unwrap(),
            "localhost:8080"
        );
        assert_eq!(
            address_body(&Bytes::from_static(b"  http://h:1  ")).unwrap(),
            "http://h:1"
        );
        assert!(address_body(&Bytes::new()).is_err());
    }

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        assert_eq!(
            status_for(&Error::UnknownInbound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::InboundExists("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Error::RemoveActive {
                inbound: "i".into(),
                outbound: "o".into()
            }),
            StatusCode::BAD_REQUEST
        );
    }
}
