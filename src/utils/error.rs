//! Error types and handling
//!
//! Common error types used across the application.

use crate::capture::AcquisitionFailure;
use crate::export::ExportError;
use crate::recorder::StreamError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Camera unavailable: {0}")]
    Acquisition(#[from] AcquisitionFailure),

    #[error("Recording error: {0}")]
    Stream(#[from] StreamError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Recorder is no longer running")]
    RecorderUnavailable,
}

/// Error response for frontend
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Acquisition(AcquisitionFailure::PermissionDenied(_)) => "PERMISSION_DENIED",
            AppError::Acquisition(AcquisitionFailure::NotFound(_)) => "DEVICE_NOT_FOUND",
            AppError::Acquisition(AcquisitionFailure::Other(_)) => "ACQUISITION_ERROR",
            AppError::Stream(_) => "RECORDING_ERROR",
            AppError::Export(_) => "EXPORT_ERROR",
            AppError::RecorderUnavailable => "RECORDER_UNAVAILABLE",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
