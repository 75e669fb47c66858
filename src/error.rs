use crate::request::{Action, RequestStatus};

/// One violated constraint, keyed by the form field it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Intake validation failure carrying the union of all violated
/// constraints, not just the first one hit.
#[derive(thiserror::Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("validation failed: {}", self.describe())]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut this = Self::default();
        this.push(field, message);
        this
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when any collected error belongs to the given field.
    pub fn mentions(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn describe(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("request {0} not found")]
    NotFound(u64),

    #[error("action '{action}' is not valid while the request is {status}")]
    InvalidTransition {
        action: Action,
        status: RequestStatus,
    },

    #[error("no active template for {0}")]
    TemplateNotFound(String),

    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Storage(#[from] sled::Error),

    #[error("stored record could not be encoded or decoded: {0}")]
    Codec(String),
}
