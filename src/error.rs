use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire service
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Settlement failures are retried by the next timer or sweep fire.
    /// Everything else needs a caller or an operator to act.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Settlement(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

/// Plan lifecycle and validation errors
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Unknown interval: {0}")]
    UnknownInterval(String),

    #[error("Unknown lock type: {0}")]
    UnknownLockType(String),

    #[error("Invalid amount for {field}: {value}")]
    InvalidAmount { field: &'static str, value: String },

    #[error("Lock duration {0}s is out of range")]
    InvalidDuration(u64),

    #[error("Plan for pool {0} is stopped")]
    NotActive(String),

    #[error("Plan for pool {0} is already active")]
    AlreadyActive(String),

    #[error("Plan for pool {0} is already stopped")]
    AlreadyStopped(String),

    #[error("Execution already in flight for pool {0}")]
    ExecutionInFlight(String),

    #[error("A plan already exists for pool {0}")]
    DuplicatePool(String),
}

/// Failures reported by the settlement layer
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Settlement rejected: {0}")]
    Rejected(String),

    #[error("Settlement network error: {0}")]
    Network(String),

    #[error("Invalid settlement response: {0}")]
    InvalidResponse(String),
}

/// Signing credential custody errors
#[derive(Error, Debug)]
pub enum CustodyError {
    #[error("Encrypted key is malformed: {0}")]
    Malformed(String),

    #[error("Failed to decrypt signing key")]
    DecryptionFailed,

    #[error("Failed to encrypt signing key: {0}")]
    EncryptionFailed(String),

    #[error("Invalid signing secret: {0}")]
    InvalidSecret(String),
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        AppError::InvalidInput(format!("Validation failed: {}", message))
    }
}

/// Result type alias for the service
pub type AppResult<T> = Result<T, AppError>;
