//! Standard response envelope helpers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::Code;

pub const SUCCESS_MSG: &str = "success";

/// Wire envelope `{"code": int, "msg": string, "data": any}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope {
            code: Code::Success.value(),
            msg: SUCCESS_MSG.to_string(),
            data: Some(data),
        }
    }

    pub fn failure(code: i32, msg: String) -> Self {
        Envelope {
            code,
            msg,
            data: None,
        }
    }
}

/// List payload. `total` is omitted entirely when the count query was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

pub fn success_ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Envelope::success(data))).into_response()
}

pub fn success_created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(Envelope::success(data))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_omitted_not_zeroed() {
        let page = ListPage::<u32> {
            items: vec![1, 2],
            total: None,
        };
        let v = serde_json::to_value(Envelope::success(page)).unwrap();
        assert_eq!(v["code"], 0);
        assert_eq!(v["msg"], "success");
        assert!(v["data"].get("total").is_none());
        assert_eq!(v["data"]["items"], serde_json::json!([1, 2]));
    }
}
