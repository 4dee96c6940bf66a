use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cluster summary: {0}")]
    Json(#[from] serde_json::Error),
    #[error("representative rendering failed: {0}")]
    Render(String),
    #[error("worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("store thread exited")]
    ChannelClosed,
}

/// Coarse failure class, for callers that map errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    NotFound,
    Validation,
    Storage,
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::NotFound(_) => ErrorClass::NotFound,
            StoreError::Validation(_) => ErrorClass::Validation,
            _ => ErrorClass::Storage,
        }
    }

    /// HTTP-style status for this error: 404, 400 or 500.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::NotFound => 404,
            ErrorClass::Validation => 400,
            ErrorClass::Storage => 500,
        }
    }

    pub(crate) fn io(action: &str, path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
        let context = format!("{action} {}", path.display());
        move |source| StoreError::Io { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StoreError::NotFound("cluster 3".into()).status_code(), 404);
        assert_eq!(StoreError::Validation("empty label".into()).status_code(), 400);
        let io = StoreError::io("read", Path::new("/x"))(std::io::Error::other("boom"));
        assert_eq!(io.status_code(), 500);
        assert_eq!(io.to_string(), "read /x: boom");
        assert_eq!(StoreError::ChannelClosed.class(), ErrorClass::Storage);
    }
}
