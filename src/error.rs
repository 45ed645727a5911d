//! Error types.
//!
//! The numerical core reports a [`FitError`] whose [`ErrorKind`] tells the
//! caller what went wrong with the data or the configuration. The binary wraps
//! everything in an [`AppError`] that carries a process exit code.

/// Coarse classification of core failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mismatched lengths, fewer than 2 observations, non-finite values.
    InvalidInput,
    /// The solver did not converge or hit a singularity.
    FitDivergence,
    /// Too few points for the requested bandwidth or computation.
    InsufficientData,
    /// The requested confidence level needs more bootstrap replicates.
    InsufficientReplicates,
    /// An inversion target lies outside the curve's range.
    OutOfRange,
    /// Unknown option name or out-of-domain option value.
    InvalidConfiguration,
}

/// Failure raised by fitting, banding, inversion, and the analysis helpers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("fit diverged: {0}")]
    FitDivergence(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("insufficient bootstrap replicates: {0}")]
    InsufficientReplicates(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl FitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FitError::InvalidInput(_) => ErrorKind::InvalidInput,
            FitError::FitDivergence(_) => ErrorKind::FitDivergence,
            FitError::InsufficientData(_) => ErrorKind::InsufficientData,
            FitError::InsufficientReplicates(_) => ErrorKind::InsufficientReplicates,
            FitError::OutOfRange(_) => ErrorKind::OutOfRange,
            FitError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
        }
    }

    /// Process exit code used when this error reaches `main`.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::InvalidConfiguration => 2,
            ErrorKind::InsufficientData | ErrorKind::InsufficientReplicates | ErrorKind::OutOfRange => 3,
            ErrorKind::FitDivergence => 4,
        }
    }
}

/// Result alias for the numerical core.
pub type FitResult<T> = Result<T, FitError>;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_error_maps_to_exit_codes() {
        let err: AppError = FitError::FitDivergence("midpoint pinned to zero".into()).into();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("midpoint pinned to zero"));

        let err: AppError = FitError::InsufficientReplicates("K=1".into()).into();
        assert_eq!(err.exit_code(), 3);

        let err: AppError = FitError::InvalidConfiguration("band".into()).into();
        assert_eq!(err.exit_code(), 2);
    }
}
