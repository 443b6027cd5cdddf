//! Request normalization: turning an HTTP request into a [`ClientRequest`].

use axum::extract::{ConnectInfo, Query, Request};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::throttle::ClientRequest;

/// Header read by default in identity mode.
pub const DEFAULT_CLIENT_ID_HEADER: &str = "x-client-id";

/// Produces a [`ClientRequest`] from an incoming HTTP request.
///
/// Implement this to plug in a deployment-specific identity policy, such as
/// reading an authenticated principal set by an earlier middleware.
pub trait RequestNormalizer: Send + Sync {
    /// Extract the caller identity, if any.
    fn client_id(&self, request: &Request) -> Option<String>;

    /// Build the normalized request with lower-cased verb and path.
    fn normalize(&self, request: &Request) -> ClientRequest {
        ClientRequest::new(
            self.client_id(request).unwrap_or_default(),
            request.method().as_str(),
            request.uri().path(),
        )
    }
}

/// Where the caller identity is taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// A request header, e.g. `x-api-key`
    Header(String),
    /// A query string parameter, e.g. `username`
    Query(String),
    /// The peer address of the connection
    RemoteAddress,
    /// The first `x-forwarded-for` entry, then `x-real-ip`, then the peer address
    ForwardedFor,
}

impl IdentitySource {
    pub fn default_header() -> Self {
        IdentitySource::Header(DEFAULT_CLIENT_ID_HEADER.to_string())
    }
}

impl RequestNormalizer for IdentitySource {
    fn client_id(&self, request: &Request) -> Option<String> {
        let id = match self {
            IdentitySource::Header(name) => header_value(request, name),
            IdentitySource::Query(name) => Query::<HashMap<String, String>>::try_from_uri(request.uri())
                .ok()
                .and_then(|Query(mut params)| params.remove(name)),
            IdentitySource::RemoteAddress => remote_address(request),
            IdentitySource::ForwardedFor => header_value(request, "x-forwarded-for")
                .and_then(|xff| xff.split(',').next().map(|ip| ip.trim().to_string()))
                .or_else(|| header_value(request, "x-real-ip"))
                .or_else(|| remote_address(request)),
        };

        id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())
    }
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn remote_address(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    fn request(uri: &str) -> Request {
        axum::http::Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_header_identity() {
        let mut req = request("/Api/Values");
        req.headers_mut().insert("x-client-id", HeaderValue::from_static("ClientA"));

        let normalized = IdentitySource::default_header().normalize(&req);
        assert_eq!(normalized.client_id, "ClientA");
        assert_eq!(normalized.http_verb, "get");
        assert_eq!(normalized.path, "/api/values");
    }

    #[test]
    fn test_missing_header_gives_empty_id() {
        let normalized = IdentitySource::default_header().normalize(&request("/"));
        assert_eq!(normalized.client_id, "");
    }

    #[test]
    fn test_query_identity() {
        let source = IdentitySource::Query("username".to_string());
        let req = request("/api/values?username=alice&x=1");
        assert_eq!(source.client_id(&req).as_deref(), Some("alice"));
        assert_eq!(source.client_id(&request("/api/values")), None);
    }

    #[test]
    fn test_remote_address_identity() {
        let mut req = request("/");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 5000))));
        assert_eq!(
            IdentitySource::RemoteAddress.client_id(&req).as_deref(),
            Some("192.168.1.7")
        );
        assert_eq!(IdentitySource::RemoteAddress.client_id(&request("/")), None);
    }

    #[test]
    fn test_forwarded_for_identity() {
        let mut req = request("/");
        req.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.1"),
        );
        assert_eq!(
            IdentitySource::ForwardedFor.client_id(&req).as_deref(),
            Some("203.0.113.1")
        );

        let mut req = request("/");
        req.headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(
            IdentitySource::ForwardedFor.client_id(&req).as_deref(),
            Some("203.0.113.9")
        );
    }
}
