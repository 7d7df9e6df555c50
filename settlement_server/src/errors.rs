use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use log::error;
use settlement_engine::{
    pipeline::MonitorError,
    signer::SignerError,
    traits::LedgerStoreError,
    AuthorizationApiError,
    PolicyError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("No authenticated user was supplied with the request.")]
    Unauthenticated,
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The request conflicts with the current state. {0}")]
    Conflict(String),
    #[error("The request cannot be fulfilled. {0}")]
    Unprocessable(String),
    #[error("Authorizations cannot be issued right now. {0}")]
    SignerUnavailable(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SignerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            error!("💻️ {self}");
        }
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<LedgerStoreError> for ServerError {
    fn from(e: LedgerStoreError) -> Self {
        match e {
            LedgerStoreError::BookingNotFound(_) => Self::NoRecordFound(e.to_string()),
            LedgerStoreError::BookingAlreadyExists(_) | LedgerStoreError::NonceAlreadyUsed(_) => {
                Self::Conflict(e.to_string())
            },
            LedgerStoreError::InvalidPolicy(_) => Self::Unprocessable(e.to_string()),
            LedgerStoreError::DatabaseError(_)
            | LedgerStoreError::EventNotFound(_)
            | LedgerStoreError::Serialization(_) => Self::BackendError(e.to_string()),
        }
    }
}

impl From<PolicyError> for ServerError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::BookingNotFound(_) => Self::NoRecordFound(e.to_string()),
            PolicyError::Unauthorized { .. } => Self::InsufficientPermissions(e.to_string()),
            PolicyError::Store(e) => e.into(),
        }
    }
}

impl From<SignerError> for ServerError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::MissingSigningKey | SignerError::InvalidSigningKey => Self::SignerUnavailable(e.to_string()),
            SignerError::Units(_) => Self::Unprocessable(e.to_string()),
            SignerError::Signing(_)
            | SignerError::Expired { .. }
            | SignerError::Recovery(_)
            | SignerError::SignerMismatch { .. } => Self::BackendError(e.to_string()),
        }
    }
}

impl From<AuthorizationApiError> for ServerError {
    fn from(e: AuthorizationApiError) -> Self {
        match e {
            AuthorizationApiError::BookingNotFound(_) => Self::NoRecordFound(e.to_string()),
            AuthorizationApiError::Unauthorized { .. } => Self::InsufficientPermissions(e.to_string()),
            AuthorizationApiError::InvalidStatus { .. } => Self::Conflict(e.to_string()),
            AuthorizationApiError::MissingWallet { .. }
            | AuthorizationApiError::PolicyNotApplicable(_)
            | AuthorizationApiError::Fee(_) => Self::Unprocessable(e.to_string()),
            AuthorizationApiError::Signer(e) => e.into(),
            AuthorizationApiError::Store(e) => e.into(),
        }
    }
}

impl From<MonitorError> for ServerError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::AlreadyRunning | MonitorError::NotRunning => Self::Conflict(e.to_string()),
            MonitorError::BookingNotFound(_) => Self::NoRecordFound(e.to_string()),
            MonitorError::Store(e) => e.into(),
            MonitorError::ReconnectAttemptsExhausted(_) | MonitorError::Chain(_) => Self::BackendError(e.to_string()),
        }
    }
}
