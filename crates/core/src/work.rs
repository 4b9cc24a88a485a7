//! Pluggable work function executed by the processor.

use thiserror::Error;

/// Failure raised by a work function; the task ends up `failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("work function failed: {0}")]
pub struct WorkError(pub String);

/// Transforms a task payload into its result.
///
/// Implementations must be safe to share across consumer loops.
pub trait WorkFunction: Send + Sync {
    fn process(&self, payload: &str) -> Result<String, WorkError>;
}

impl<F> WorkFunction for F
where
    F: Fn(&str) -> Result<String, WorkError> + Send + Sync,
{
    fn process(&self, payload: &str) -> Result<String, WorkError> {
        self(payload)
    }
}

/// Reference transform: reversed payload plus a length annotation.
///
/// `"abc"` → `"cba (len=3)"`. Reversal is by `char`; the length counts
/// UTF-16 code units.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseWithLength;

impl WorkFunction for ReverseWithLength {
    fn process(&self, payload: &str) -> Result<String, WorkError> {
        let reversed: String = payload.chars().rev().collect();
        Ok(format!("{reversed} (len={})", payload.encode_utf16().count()))
    }
}
