//! The typed error boundary between the scheduler core and its callers
//! (the HTTP surface, the worker loop). Internal plumbing uses
//! `anyhow::Result`; this enum is constructed explicitly wherever a
//! caller needs to branch on *what kind* of failure occurred.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("dependency edge would introduce a cycle")]
    CyclicDependency,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient store error")]
    TransientStore(#[from] sqlx::Error),
}

/// Unwrap the `sqlx::Error` out of an `anyhow`-wrapped query failure, for
/// callers that need a typed [`SchedulerError::TransientStore`]. Query
/// modules in `hypervisor-db` return `anyhow::Result` with `.context(...)`
/// attached; this recovers the underlying `sqlx::Error` when present.
pub fn as_transient(err: anyhow::Error) -> SchedulerError {
    match err.downcast::<sqlx::Error>() {
        Ok(sqlx_err) => SchedulerError::TransientStore(sqlx_err),
        Err(err) => {
            SchedulerError::TransientStore(sqlx::Error::Configuration(err.to_string().into()))
        }
    }
}
