use std::fmt;
use thiserror::Error;

/// Internal error taxonomy for the transaction layer. Per the propagation
/// policy (spec §7), these never escape `Stack::receive`/`Stack::process` —
/// they are converted to a stat bump and a transaction removal at the call
/// site that produced them.
#[derive(Debug, Error)]
pub enum RoadError {
    #[error("packing error: {0}")]
    Packing(String),

    #[error("parsing error: {0}")]
    Parsing(String),

    #[error("stack error: {0}")]
    Stack(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("{source}")]
    WithContext {
        #[source]
        source: Box<RoadError>,
        context: ErrorContext,
    },
}

pub type RoadResult<T> = Result<T, RoadError>;

/// Component/operation pair attached to an error for structured logging,
/// mirroring the teacher's error-context extension trait.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: &'static str,
    pub details: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in component '{}' during operation '{}'",
            self.component, self.operation
        )?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

pub trait ErrorExt {
    fn context(self, context: ErrorContext) -> RoadError;
    fn with_context(self, component: &'static str, operation: &'static str) -> RoadError;
}

impl ErrorExt for RoadError {
    fn context(self, context: ErrorContext) -> RoadError {
        RoadError::WithContext {
            source: Box::new(self),
            context,
        }
    }

    fn with_context(self, component: &'static str, operation: &'static str) -> RoadError {
        self.context(ErrorContext {
            component,
            operation,
            details: None,
        })
    }
}
