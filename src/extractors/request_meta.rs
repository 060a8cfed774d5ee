//! Transport metadata attached to every orchestrated call (actor, correlation id, client).

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, Method, Uri},
};

/// Header carrying the acting user when no upstream auth layer sets [`Actor`].
pub const ACTOR_HEADER: &str = "X-Actor";
/// Correlation id header. A UUIDv4 is generated when absent.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Authenticated principal, inserted as a request extension by an auth layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor(pub String);

#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub actor: String,
    pub request_id: String,
    pub client_ip: String,
    pub user_agent: String,
    pub method: Method,
    pub path: String,
    pub uri: Uri,
}

impl Default for RequestMeta {
    fn default() -> Self {
        RequestMeta {
            actor: String::new(),
            request_id: uuid::Uuid::new_v4().to_string(),
            client_ip: String::new(),
            user_agent: String::new(),
            method: Method::GET,
            path: "/".into(),
            uri: Uri::from_static("/"),
        }
    }
}

impl RequestMeta {
    /// Metadata for calls that do not originate from HTTP (jobs, tests).
    pub fn internal(actor: &str) -> Self {
        RequestMeta {
            actor: actor.to_string(),
            ..Default::default()
        }
    }

    /// Query string as ordered key/value pairs; undecodable strings yield none.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        axum::extract::Query::<Vec<(String, String)>>::try_from_uri(&self.uri)
            .map(|q| q.0)
            .unwrap_or_default()
    }

    fn from_parts(parts: &Parts) -> Self {
        let headers = &parts.headers;
        let actor = parts
            .extensions
            .get::<Actor>()
            .map(|a| a.0.clone())
            .or_else(|| header(headers, ACTOR_HEADER))
            .unwrap_or_default();
        let request_id =
            header(headers, REQUEST_ID_HEADER).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let client_ip = header(headers, "X-Forwarded-For")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| header(headers, "X-Real-IP"))
            .unwrap_or_default();
        RequestMeta {
            actor,
            request_id,
            client_ip,
            user_agent: header(headers, "User-Agent").unwrap_or_default(),
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            uri: parts.uri.clone(),
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestMeta::from_parts(parts))
    }
}
