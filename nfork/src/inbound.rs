use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::Request;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::classify::{classify, Failure};
use crate::config::InboundDescriptor;
use crate::error::{Error, Result};
use crate::stats::{Event, Outcome, StatsRecorder, StatsSnapshot};
use crate::transport::{build_client, target_uri, HttpClient};
use crate::NFORK_HEADER;

/// Timeout applied to every outbound attempt unless the descriptor sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Status returned to the client when the active outbound fails.
pub const DEFAULT_TIMEOUT_CODE: StatusCode = StatusCode::SERVICE_UNAVAILABLE;

/// A named listener that duplicates every HTTP request to a set of outbound
/// targets and answers the client with the active outbound's response. All
/// other responses are read to completion and dropped.
///
/// An `Inbound` is immutable once published; mutations run on a fresh copy
/// produced by `snapshot` (see `InboundServer`).
pub struct Inbound {
    name: String,
    listen: String,
    outbounds: HashMap<String, String>,
    active: String,
    timeout: Duration,
    timeout_code: StatusCode,
    idle_connections: usize,
    client: HttpClient,
    stats: HashMap<String, Arc<StatsRecorder>>,
}

impl Inbound {
    /// Validates a descriptor and builds the runtime inbound. An empty name
    /// falls back to the listen address; listen, outbounds and an active
    /// outbound that exists in the map are required.
    pub fn from_descriptor(descriptor: &InboundDescriptor) -> Result<Self> {
        let name = if descriptor.name.is_empty() {
            descriptor.listen.clone()
        } else {
            descriptor.name.clone()
        };

        if descriptor.listen.is_empty() {
            return Err(Error::Validation("missing listen host".to_string()));
        }

        if descriptor.outbounds.is_empty() {
            return Err(Error::Validation(format!("no outbound in '{}'", name)));
        }

        if descriptor.active.is_empty() {
            return Err(Error::Validation(format!("no active outbound in '{}'", name)));
        }

        if !descriptor.outbounds.contains_key(&descriptor.active) {
            return Err(Error::Validation(format!(
                "active outbound '{}' doesn't exist in '{}'",
                descriptor.active, name
            )));
        }

        let timeout_code = match descriptor.timeout_code {
            Some(code) => StatusCode::from_u16(code).map_err(|_| {
                Error::Validation(format!("invalid timeout code {} in '{}'", code, name))
            })?,
            None => DEFAULT_TIMEOUT_CODE,
        };

        let idle_connections = descriptor.idle_connections.unwrap_or(0);

        let stats = descriptor
            .outbounds
            .keys()
            .map(|outbound| (outbound.clone(), Arc::new(StatsRecorder::new())))
            .collect();

        Ok(Self {
            name,
            listen: descriptor.listen.clone(),
            outbounds: descriptor.outbounds.clone(),
            active: descriptor.active.clone(),
            timeout: descriptor.timeout.unwrap_or(DEFAULT_TIMEOUT),
            timeout_code,
            idle_connections,
            client: build_client(idle_connections),
            stats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    pub fn outbounds(&self) -> &HashMap<String, String> {
        &self.outbounds
    }

    /// The inbound as a descriptor, with defaults resolved.
    pub fn descriptor(&self) -> InboundDescriptor {
        InboundDescriptor {
            name: self.name.clone(),
            listen: self.listen.clone(),
            outbounds: self.outbounds.clone(),
            active: self.active.clone(),
            timeout: Some(self.timeout),
            timeout_code: Some(self.timeout_code.as_u16()),
            idle_connections: Some(self.idle_connections),
        }
    }

    /// A copy suitable for copy-on-write publication: the maps are cloned,
    /// the stats recorders and the HTTP client are shared with the original
    /// so telemetry and the connection pool carry over.
    pub(crate) fn snapshot(&self) -> Self {
        Self {
            name: self.name.clone(),
            listen: self.listen.clone(),
            outbounds: self.outbounds.clone(),
            active: self.active.clone(),
            timeout: self.timeout,
            timeout_code: self.timeout_code,
            idle_connections: self.idle_connections,
            client: self.client.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Inserts or overwrites an outbound. Overwriting resets its telemetry.
    pub(crate) fn add_outbound(&mut self, outbound: &str, addr: &str) {
        self.outbounds
            .insert(outbound.to_string(), addr.to_string());
        self.stats
            .insert(outbound.to_string(), Arc::new(StatsRecorder::new()));
    }

    /// Removes an outbound and closes its recorder. Removing the active
    /// outbound is rejected; the operator has to activate another one first.
    pub(crate) fn remove_outbound(&mut self, outbound: &str) -> Result<()> {
        if !self.outbounds.contains_key(outbound) {
            return Err(Error::UnknownOutbound {
                inbound: self.name.clone(),
                outbound: outbound.to_string(),
            });
        }

        if outbound == self.active {
            return Err(Error::RemoveActive {
                inbound: self.name.clone(),
                outbound: outbound.to_string(),
            });
        }

        self.outbounds.remove(outbound);
        if let Some(recorder) = self.stats.remove(outbound) {
            recorder.close();
        }

        Ok(())
    }

    pub(crate) fn activate_outbound(&mut self, outbound: &str) -> Result<()> {
        if !self.outbounds.contains_key(outbound) {
            return Err(Error::UnknownOutbound {
                inbound: self.name.clone(),
                outbound: outbound.to_string(),
            });
        }

        self.active = outbound.to_string();
        Ok(())
    }

    /// Stats for every outbound, from the last published window.
    pub fn read_stats(&self) -> HashMap<String, StatsSnapshot> {
        self.stats
            .iter()
            .map(|(outbound, recorder)| (outbound.clone(), recorder.read().snapshot()))
            .collect()
    }

    pub fn read_outbound_stats(&self, outbound: &str) -> Result<StatsSnapshot> {
        let recorder = self.stats.get(outbound).ok_or_else(|| Error::UnknownOutbound {
            inbound: self.name.clone(),
            outbound: outbound.to_string(),
        })?;
        Ok(recorder.read().snapshot())
    }

    /// Serves one client request: buffers the body, fans the request out to
    /// every outbound, and answers with the active outbound's response, or
    /// the timeout code with the error text when the active attempt fails.
    pub async fn serve(self: Arc<Self>, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                debug!(inbound = %self.name, error = %err, "unable to read request body");
                return plain_response(StatusCode::BAD_REQUEST, &err.to_string());
            }
        };

        // The host header is rewritten per target by the client; everything
        // else is forwarded as received, plus the duplication marker.
        let mut headers = parts.headers;
        headers.remove(HOST);
        headers.insert(NFORK_HEADER, HeaderValue::from_static("true"));

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut active_addr = None;
        for (outbound, addr) in &self.outbounds {
            if *outbound == self.active {
                active_addr = Some(addr.clone());
                continue;
            }

            let this = Arc::clone(&self);
            let outbound = outbound.clone();
            let addr = addr.clone();
            let method = parts.method.clone();
            let headers = headers.clone();
            let path_and_query = path_and_query.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let _ = this
                    .forward(&outbound, &addr, method, &path_and_query, headers, body)
                    .await;
            });
        }

        let Some(active_addr) = active_addr else {
            error!(inbound = %self.name, active = %self.active, "active outbound missing from outbound map");
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "no active outbound");
        };

        let active = self.active.clone();
        match self
            .forward(&active, &active_addr, parts.method, &path_and_query, headers, body)
            .await
        {
            Ok((head, body)) => {
                let mut response = Response::new(Full::new(body));
                *response.status_mut() = head.status;
                *response.headers_mut() = head.headers;
                response
            }
            Err(message) => plain_response(self.timeout_code, &message),
        }
    }

    /// One attempt against one outbound. Exactly one event is recorded, with
    /// the latency measured from clone construction until the response body
    /// has been read or the failure classified.
    async fn forward(
        &self,
        outbound: &str,
        addr: &str,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> std::result::Result<(http::response::Parts, Bytes), String> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        let result = self
            .attempt(addr, method, path_and_query, headers, body, deadline)
            .await;

        let latency = started.elapsed();
        match result {
            Ok((head, body)) => {
                self.record(
                    outbound,
                    Event {
                        outcome: Outcome::Response(head.status.as_u16()),
                        latency,
                    },
                );
                Ok((head, body))
            }
            Err(attempt) => {
                let failure = attempt.failure();
                let message = attempt.to_string();
                match failure {
                    Failure::Timeout => {
                        debug!(inbound = %self.name, outbound, error = %message, "outbound timeout")
                    }
                    Failure::Error => {
                        warn!(inbound = %self.name, outbound, error = %message, "outbound error")
                    }
                }
                self.record(
                    outbound,
                    Event {
                        outcome: failure.into(),
                        latency,
                    },
                );
                Err(message)
            }
        }
    }

    async fn attempt(
        &self,
        addr: &str,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
        deadline: Instant,
    ) -> std::result::Result<(http::response::Parts, Bytes), AttemptError> {
        let uri = target_uri(addr, path_and_query).map_err(AttemptError::Request)?;

        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body))
            .map_err(AttemptError::Request)?;
        *request.headers_mut() = headers;

        let response = tokio::time::timeout_at(deadline, self.client.request(request))
            .await
            .map_err(|_| AttemptError::Deadline)?
            .map_err(AttemptError::Send)?;

        let (head, body) = response.into_parts();

        // The body is always read to completion, on the active and shadow
        // paths alike, so the pooled connection can be reused.
        let collected = tokio::time::timeout_at(deadline, body.collect())
            .await
            .map_err(|_| AttemptError::Deadline)?
            .map_err(AttemptError::Recv)?;

        Ok((head, collected.to_bytes()))
    }

    fn record(&self, outbound: &str, event: Event) {
        match self.stats.get(outbound) {
            Some(recorder) => recorder.record(event),
            None => {
                error!(inbound = %self.name, outbound, "no stats recorder for outbound")
            }
        }
    }
}

/// What went wrong during a single attempt, kept apart so the classifier
/// sees the typed cause.
#[derive(Debug)]
enum AttemptError {
    Deadline,
    Request(http::Error),
    Send(hyper_util::client::legacy::Error),
    Recv(hyper::Error),
}

impl AttemptError {
    fn failure(&self) -> Failure {
        match self {
            AttemptError::Deadline => Failure::Timeout,
            AttemptError::Request(_) => Failure::Error,
            AttemptError::Send(err) => classify(err),
            AttemptError::Recv(err) => classify(err),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Deadline => write!(f, "outbound deadline exceeded"),
            AttemptError::Request(err) => write!(f, "invalid outbound request: {}", err),
            AttemptError::Send(err) => write!(f, "{}", err),
            AttemptError::Recv(err) => write!(f, "{}", err),
        }
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
