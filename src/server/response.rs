use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Success,
    Error,
}

/// JSON envelope shared by every API response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn success(status: StatusCode, data: T) -> Self {
        Self {
            kind: ResponseType::Success,
            message: status_message(status).to_string(),
            data: Some(data),
            errors: None,
        }
    }

    pub fn error(status: StatusCode, errors: Vec<String>) -> Self {
        Self {
            kind: ResponseType::Error,
            message: status_message(status).to_string(),
            data: None,
            errors: Some(errors),
        }
    }
}

/// Short status text placed in the envelope's `message`.
pub fn status_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::OK => "ok",
        other => other.canonical_reason().unwrap_or("Success"),
    }
}

/// Serialize `body` with `status` as the HTTP status.
pub fn respond<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}
