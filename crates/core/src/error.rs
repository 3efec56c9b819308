use std::fmt;

/// Missing upstream data in the log chain.
///
/// Raised when a planner entry, log record, price bar or news item that a stage depends on
/// cannot be resolved. Always fatal for the stage; the driver aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    pub what: &'static str,
    pub key: String,
}

impl NotFound {
    pub fn new(what: &'static str, key: impl fmt::Display) -> Self {
        Self {
            what,
            key: key.to_string(),
        }
    }
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not found for {}", self.what, self.key)
    }
}

impl std::error::Error for NotFound {}

/// True when `err` (or anything in its context chain) is a [`NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<NotFound>())
}
