//! JSON envelopes returned to transport adapters for list/get operations.
//!
//! Shape: `{ status, data?, error?, metadata? }`; batch operations carry a
//! `bulk` sub-object inside `metadata`.

use serde::{Deserialize, Serialize};

use crate::errors::OrchestrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Error body with the stable symbolic code from the taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Batch counters reported under `metadata.bulk`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkMetadata {
    pub total: usize,
    pub returned: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk: Option<BulkMetadata>,
}

/// Response envelope for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: ResponseStatus::Ok,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn ok_bulk(data: T, bulk: BulkMetadata) -> Self {
        Self {
            status: ResponseStatus::Ok,
            data: Some(data),
            error: None,
            metadata: Some(ResponseMetadata { bulk: Some(bulk) }),
        }
    }

    pub fn error(err: &OrchestrationError) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            error: Some(ApiError {
                code: err.error_code().to_string(),
                message: err.to_string(),
            }),
            metadata: None,
        }
    }
}
