use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::{ACCOUNT_COST, ApiResponse};
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Outcomes of ledger operations that did not apply. Nothing is written when one of these is
/// returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid code")]
    InvalidCode,

    #[error("Code already used")]
    AlreadyUsed,

    #[error("Insufficient points: balance {balance}, required {required}")]
    InsufficientPoints { balance: u64, required: u64 },

    #[error("No accounts available")]
    PoolEmpty,

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored record could not be decoded. Retrying reads the same bytes.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

impl LedgerError {
    pub fn insufficient(balance: u64) -> Self {
        LedgerError::InsufficientPoints {
            balance,
            required: ACCOUNT_COST,
        }
    }

    /// Only transient store failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidCode => "INVALID_CODE",
            LedgerError::AlreadyUsed => "ALREADY_USED",
            LedgerError::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            LedgerError::PoolEmpty => "POOL_EMPTY",
            LedgerError::AlreadyExists(_) => "ALREADY_EXISTS",
            LedgerError::MalformedEntry(_) => "MALFORMED_ENTRY",
            LedgerError::NotAuthorized => "NOT_AUTHORIZED",
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            LedgerError::CorruptRecord(_) => "CORRUPT_RECORD",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::InvalidCode => StatusCode::NOT_FOUND,
            LedgerError::AlreadyUsed | LedgerError::PoolEmpty | LedgerError::AlreadyExists(_) => {
                StatusCode::CONFLICT
            }
            LedgerError::InsufficientPoints { .. }
            | LedgerError::MalformedEntry(_)
            | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotAuthorized => StatusCode::FORBIDDEN,
            LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::CorruptRecord(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPath(path) => {
                LedgerError::InvalidInput(format!("invalid identifier in {path}"))
            }
            StoreError::Corrupt { path, reason } => {
                LedgerError::CorruptRecord(format!("{path}: {reason}"))
            }
            other => LedgerError::StoreUnavailable(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Ledger(err) => err.status_code(),
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) | AppError::JwtError(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_code, message) = match self {
            AppError::Ledger(err) => {
                if err.is_retryable() || matches!(err, LedgerError::CorruptRecord(_)) {
                    log::error!("Ledger store failure: {err}");
                } else {
                    log::debug!("Ledger rejected request: {err}");
                }
                (err.code(), err.to_string())
            }
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                ("VALIDATION_ERROR", msg.clone())
            }
            AppError::AuthError(msg) => {
                log::warn!("Authentication error: {msg}");
                ("AUTH_ERROR", msg.clone())
            }
            AppError::JwtError(err) => {
                log::warn!("Authentication error: {err}");
                ("AUTH_ERROR", "Invalid access token".to_string())
            }
            AppError::NotFound(msg) => ("NOT_FOUND", msg.clone()),
            AppError::ExternalApiError(msg) => {
                log::error!("External API error: {msg}");
                ("EXTERNAL_API_ERROR", msg.clone())
            }
            AppError::DatabaseError(err) => {
                log::error!("Database error: {err}");
                ("DATABASE_ERROR", "Database error".to_string())
            }
            _ => {
                log::error!("Internal error: {self}");
                ("INTERNAL_ERROR", "Internal server error".to_string())
            }
        };

        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::error(error_code, message))
    }
}
