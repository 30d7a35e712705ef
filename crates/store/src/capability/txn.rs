//! Run a closure inside a transaction.
//!
//! Each helper begins a transaction, runs the closure, then commits (or
//! ends, for reads). If the closure fails, a write is aborted where the
//! capability supports it and ended otherwise, and the closure's error is
//! returned. Called while a transaction is already active, the closure runs
//! inside it and the caller stays responsible for finishing it.
//!
//! ```no_run
//! use graphvault_store::{Quad, Store};
//! use graphvault_store::capability::{Dataset, QuadAccess, txn};
//!
//! let store = Store::open_in_memory()?;
//! let mut dataset = Dataset::new(&store);
//! txn::execute_write(&mut dataset, |d| d.add(&Quad::new(1u64, 2u64, 3u64, 4u64)).map(|_| ()))?;
//! let size = txn::calculate_read(&mut dataset, |d| d.size())?;
//! assert_eq!(size, 1);
//! # Ok::<(), graphvault_store::Error>(())
//! ```

use tracing::{debug, warn};

use super::{ReadWrite, Transactional, TxnType};
use crate::error::{Error, Result};

/// Runs `action` in a read transaction.
///
/// # Errors
///
/// Returns the closure's error, or the error of beginning or ending.
pub fn execute_read<T, F>(dataset: &mut T, action: F) -> Result<()>
where
    T: Transactional + ?Sized,
    F: FnOnce(&mut T) -> Result<()>,
{
    calculate_read(dataset, action)
}

/// Runs `action` in a read transaction and returns its result.
///
/// # Errors
///
/// Same as [`execute_read`].
pub fn calculate_read<T, R, F>(dataset: &mut T, action: F) -> Result<R>
where
    T: Transactional + ?Sized,
    F: FnOnce(&mut T) -> Result<R>,
{
    if dataset.is_in_transaction() {
        return action(dataset);
    }
    dataset.begin(TxnType::Read)?;
    let result = action(dataset);
    let ended = dataset.end();
    let value = result?;
    ended?;
    Ok(value)
}

/// Runs `action` in a write transaction and commits.
///
/// # Errors
///
/// Returns the closure's error after rolling back, or the error of
/// beginning or committing. Inside an active plain read, returns
/// [`Error::ReadOnlyTransaction`]; inside a promotable read that can no
/// longer promote, [`Error::PromotionConflict`].
pub fn execute_write<T, F>(dataset: &mut T, action: F) -> Result<()>
where
    T: Transactional + ?Sized,
    F: FnOnce(&mut T) -> Result<()>,
{
    calculate_write(dataset, action)
}

/// Runs `action` in a write transaction, commits and returns its result.
///
/// # Errors
///
/// Same as [`execute_write`].
pub fn calculate_write<T, R, F>(dataset: &mut T, action: F) -> Result<R>
where
    T: Transactional + ?Sized,
    F: FnOnce(&mut T) -> Result<R>,
{
    if dataset.is_in_transaction() {
        match dataset.transaction_mode() {
            Some(ReadWrite::Write) => {},
            _ if dataset.transaction_type() == Some(TxnType::Read) => {
                return Err(Error::ReadOnlyTransaction);
            },
            _ => {
                if !dataset.promote()? {
                    return Err(Error::PromotionConflict);
                }
            },
        }
        return action(dataset);
    }

    dataset.begin(TxnType::Write)?;
    match action(dataset) {
        Ok(value) => {
            dataset.commit()?;
            Ok(value)
        },
        Err(e) => {
            debug!(error = %e, "Write action failed; rolling back");
            let rollback = if dataset.supports_transaction_abort() {
                dataset.abort()
            } else {
                dataset.end()
            };
            // The action's error wins over any rollback failure.
            if let Err(rollback) = rollback {
                warn!(error = %rollback, "Rollback after failed write action also failed");
            }
            Err(e)
        },
    }
}
