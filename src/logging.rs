use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// A unique identifier for a particular register or campaign operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct OpId(pub usize);

impl Display for OpId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OpId {
    /// Atomically get the next ID. This wraps around back to zero if you somehow exceed a usize.
    pub fn next() -> OpId {
        static OP_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        OpId(OP_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Log the start of an operation and return its ID.
    pub fn start(operation: impl Display) -> OpId {
        let id = Self::next();
        info!("->op{id} {operation}");
        id
    }

    /// Log how an operation finished.
    /// Storage failures are errors; rejected requests are warnings.
    pub fn finish<T: Debug>(self, result: &Result<T>) {
        self.log(result.as_ref().map(|value| value as &dyn Debug));
    }

    /// Like [`OpId::finish`], but log only a summary of a successful result.
    pub fn finish_with<T, D: Debug>(self, result: &Result<T>, summary: impl FnOnce(&T) -> D) {
        match result {
            Ok(value) => self.log(Ok(&summary(value))),
            Err(err) => self.log(Err(err)),
        }
    }

    fn log(self, outcome: std::result::Result<&dyn Debug, &Error>) {
        let id = self;
        match outcome {
            Ok(value) => info!("<-op{id} {value:?}"),
            Err(err) if err.is_retryable() => error!("<-op{id} {err}"),
            Err(err) => warn!("<-op{id} {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let first = OpId::next();
        let second = OpId::next();
        assert!(second > first);
        assert_eq!(format!("{}", OpId(7)), "7");
    }
}
