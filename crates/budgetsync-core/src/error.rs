use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// Failure captured at the store boundary.
///
/// Stored inside snapshots, so it is cheap to clone. Never returned from
/// `Store::read`; callers observe it through the snapshot's `error` field.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),

    #[error("Fetcher panicked: {0}")]
    Panicked(String),

    #[error("No async runtime available to run the fetch")]
    NoRuntime,
}

impl FetchError {
    /// Build from the payload of a caught panic.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        FetchError::Panicked(message)
    }

    /// The underlying error when the fetcher reported one.
    pub fn source_error(&self) -> Option<&anyhow::Error> {
        match self {
            FetchError::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        FetchError::Failed(Arc::new(err))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Store '{name}' is registered for {registered}, not {requested}")]
    TypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },
}
