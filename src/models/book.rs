//! Book model and inventory counters.
//!
//! `total_copies` is the number of physical copies the library owns and is
//! only edited administratively. `available_copies` is owned by the inventory
//! ledger (`services::ledger`) and must stay within `[0, total_copies]`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::author::AuthorShort;
use super::loan::LoanDetails;

/// Book model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub isbn: String,
    pub genre: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub total_copies: i32,
    pub available_copies: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Book summary attached to loan listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BookShort {
    pub id: Uuid,
    pub title: String,
    pub isbn: String,
    pub author: AuthorShort,
}

/// Book with its author and currently open loans
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookDetails {
    pub book: Book,
    pub author: AuthorShort,
    pub open_loans: Vec<LoanDetails>,
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 500, message = "Title must be 1-500 characters"))]
    pub title: String,
    #[validate(length(min = 10, max = 17, message = "ISBN must be 10-17 characters"))]
    pub isbn: String,
    pub author_id: Uuid,
    pub genre: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(range(min = 1, message = "A book needs at least one copy"))]
    pub total_copies: i32,
}

/// Administrative update of a book.
///
/// Changing `total_copies` does not touch `available_copies`.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 500, message = "Title must be 1-500 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 10, max = 17, message = "ISBN must be 10-17 characters"))]
    pub isbn: Option<String>,
    pub genre: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(range(min = 1, message = "A book needs at least one copy"))]
    pub total_copies: Option<i32>,
}

/// Consistency report for one book's ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LedgerReport {
    pub book_id: Uuid,
    pub total_copies: i32,
    pub available_copies: i32,
    pub open_loans: i64,
    /// `available_copies == total_copies - open_loans` and within bounds
    pub consistent: bool,
}

impl LedgerReport {
    pub fn new(book: &Book, open_loans: i64) -> Self {
        let available = i64::from(book.available_copies);
        let total = i64::from(book.total_copies);
        Self {
            book_id: book.id,
            total_copies: book.total_copies,
            available_copies: book.available_copies,
            open_loans,
            consistent: available >= 0 && available <= total && available == total - open_loans,
        }
    }
}
