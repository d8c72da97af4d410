use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Body shape shared by every API response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub errors: Option<Vec<ErrorDetail>>,
    pub data: Option<T>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(rename = "message_title")]
    pub title: String,
    pub severity: String,
}

impl ErrorDetail {
    pub fn new(code: &str, title: &str, message: String) -> Self {
        Self {
            code: code.to_string(),
            message,
            title: title.to_string(),
            severity: "error".to_string(),
        }
    }
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            errors: None,
            data: Some(data),
        }
    }

    pub fn failure(detail: ErrorDetail) -> Self {
        Self {
            success: false,
            errors: Some(vec![detail]),
            data: None,
        }
    }
}

pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(Envelope::ok(data))).into_response()
}
