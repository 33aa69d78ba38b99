//! Inventory ledger.
//!
//! Owns `Book::available_copies`. Both mutations run inside the caller's
//! [`LendingTx`] after locking the book row, so the read, the check and the
//! write happen as one unit. Only the loan lifecycle calls into this module.

use thiserror::Error;
use uuid::Uuid;

use crate::{error::AppError, models::book::Book, repository::LendingTx};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("book {0} does not exist")]
    NotFound(Uuid),

    #[error("book {0} has no copies left")]
    Exhausted(Uuid),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<LedgerError> for AppError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::NotFound(id) => AppError::BookNotFound(id),
            LedgerError::Exhausted(id) => AppError::BookUnavailable(id),
            LedgerError::Store(e) => e,
        }
    }
}

/// Take one copy out of circulation. Returns the book as updated.
pub(crate) async fn reserve_copy(tx: &mut dyn LendingTx, book_id: Uuid) -> Result<Book, LedgerError> {
    let book = tx
        .lock_book(book_id)
        .await?
        .ok_or(LedgerError::NotFound(book_id))?;

    if book.available_copies <= 0 {
        return Err(LedgerError::Exhausted(book_id));
    }

    let available_copies = book.available_copies - 1;
    tx.write_available_copies(book_id, available_copies).await?;

    Ok(Book {
        available_copies,
        ..book
    })
}

/// Put one copy back into circulation.
///
/// Not clamped to `total_copies`: the loan lifecycle releases at most once
/// per loan, and an administrative edit of `total_copies` may legitimately
/// leave the counters out of step.
pub(crate) async fn release_copy(tx: &mut dyn LendingTx, book_id: Uuid) -> Result<Book, LedgerError> {
    let book = tx
        .lock_book(book_id)
        .await?
        .ok_or(LedgerError::NotFound(book_id))?;

    let available_copies = book.available_copies + 1;
    tx.write_available_copies(book_id, available_copies).await?;

    Ok(Book {
        available_copies,
        ..book
    })
}
