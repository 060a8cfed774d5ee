//! Axum extractors.

mod request_meta;

pub use request_meta::{Actor, RequestMeta, ACTOR_HEADER, REQUEST_ID_HEADER};
