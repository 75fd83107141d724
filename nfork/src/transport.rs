use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// The pooled client shared by every request on an inbound.
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

const DIAL_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Builds the outbound HTTP/1 client. `idle_connections` caps pooled idle
/// sockets per host; 0 keeps the pool default.
pub fn build_client(idle_connections: usize) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    connector.set_keepalive(Some(DIAL_KEEP_ALIVE));

    let mut builder = Client::builder(TokioExecutor::new());
    if idle_connections > 0 {
        builder.pool_max_idle_per_host(idle_connections);
    }
    builder.build(connector)
}

/// Splits an outbound target of the form `[scheme://]host[:port]`. The
/// scheme defaults to http when absent.
pub fn split_target(addr: &str) -> (&str, &str) {
    match addr.find("://") {
        Some(at) => (&addr[..at], &addr[at + 3..]),
        None => ("http", addr),
    }
}

/// Builds the request URI for one outbound attempt: the target's scheme and
/// authority with the client's path and query.
pub fn target_uri(addr: &str, path_and_query: &str) -> Result<Uri, http::Error> {
    let (scheme, authority) = split_target(addr);
    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
}
