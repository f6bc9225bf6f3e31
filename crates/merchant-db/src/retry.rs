//! Bounded retry of soft (serialization) failures, per 4.B.

use crate::error::DbError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Re-executes `f` up to `max_attempts` times while it returns
/// `DbError::Soft`; any other error (or eventual exhaustion) is returned
/// as-is to the caller, which maps hard failures to an internal-error
/// reply (§7).
pub fn with_retry<T>(max_attempts: u32, mut f: impl FnMut() -> Result<T, DbError>) -> Result<T, DbError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f() {
            Ok(v) => return Ok(v),
            Err(DbError::Soft(msg)) if attempt < max_attempts => {
                tracing::warn!(attempt, max_attempts, %msg, "retrying soft database failure");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_soft_failures_up_to_bound() {
        let attempts = Cell::new(0);
        let result: Result<i32, DbError> = with_retry(3, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(DbError::Soft("conflict".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn gives_up_after_bound() {
        let attempts = Cell::new(0);
        let result: Result<i32, DbError> = with_retry(3, || {
            attempts.set(attempts.get() + 1);
            Err(DbError::Soft("always conflicts".into()))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn hard_failure_not_retried() {
        let attempts = Cell::new(0);
        let result: Result<i32, DbError> = with_retry(3, || {
            attempts.set(attempts.get() + 1);
            Err(DbError::Hard("corrupt".into()))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }
}
