//! The unified error handling system for the cache layer.

// 1. Core Types
pub use types::CacheError;

/// A unified `Result` type for the cache crate.
///
/// Backend primitives and startup paths return this type; the fail-soft
/// facades convert it into documented defaults instead.
pub type Result<T> = std::result::Result<T, CacheError>;

// 2. Module declarations
pub mod macros;
pub mod types;

// 3. Context Trait for adding context to errors.
/// Attaches a human-readable context message to any error convertible into [`CacheError`].
pub trait Context<T, E> {
    /// Wraps the error with a fixed context message.
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display;

    /// Wraps the error with a lazily built context message.
    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<CacheError>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display,
    {
        self.with_context(|| context)
    }

    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => {
                let context_message = context().to_string();
                Err(CacheError::Context {
                    context: context_message,
                    source: Box::new(error.into()),
                })
            }
        }
    }
}
