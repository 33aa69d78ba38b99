//! Repository layer for database operations.
//!
//! Each store is an async trait so the services can run against Postgres in
//! production and against [`memory::MemoryStore`] in tests. Borrow and return
//! go through a [`LendingTx`]: one open database transaction that is rolled
//! back when dropped without [`LendingTx::commit`].

pub mod books;
pub mod loans;
pub mod memory;
pub mod users;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        author::Author,
        book::{Book, BookShort, UpdateBook},
        loan::{Loan, LoanDetails},
        user::{User, UserShort},
    },
};

/// Books and their authors
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>>;
    /// All books, newest first
    async fn list_books(&self) -> AppResult<Vec<Book>>;
    async fn insert_book(&self, book: &Book) -> AppResult<()>;
    /// Never writes `available_copies`
    async fn update_book(&self, id: Uuid, update: &UpdateBook, now: DateTime<Utc>) -> AppResult<Option<Book>>;
    async fn get_author(&self, id: Uuid) -> AppResult<Option<Author>>;
    /// All authors, by name
    async fn list_authors(&self) -> AppResult<Vec<Author>>;
    /// One author's books, by title
    async fn list_books_by_author(&self, author_id: Uuid) -> AppResult<Vec<Book>>;
    async fn insert_author(&self, author: &Author) -> AppResult<()>;
}

/// Borrowers
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn insert_user(&self, user: &User) -> AppResult<()>;
}

/// Loan records and the lending transaction entry point
#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Open a unit of work for a borrow or a return
    async fn begin(&self) -> AppResult<Box<dyn LendingTx>>;
    async fn get_loan(&self, id: Uuid) -> AppResult<Option<Loan>>;
    async fn get_loan_record(&self, id: Uuid) -> AppResult<Option<LoanRecord>>;
    /// Matching loans, most recent borrow first
    async fn list_loan_records(&self, filter: LoanFilter) -> AppResult<Vec<LoanRecord>>;
    async fn count_open_for_book(&self, book_id: Uuid) -> AppResult<i64>;
    async fn count_active(&self) -> AppResult<i64>;
    async fn count_overdue(&self, now: DateTime<Utc>) -> AppResult<i64>;
    /// Cheap connectivity probe
    async fn ping(&self) -> AppResult<()>;
}

/// One open transaction over the lending tables.
///
/// Rows read with the `lock_*` methods stay locked until the transaction ends,
/// which serializes concurrent borrows and returns on the same book or loan.
/// Dropping the transaction without calling `commit` discards every write.
#[async_trait]
pub trait LendingTx: Send {
    async fn lock_book(&mut self, id: Uuid) -> AppResult<Option<Book>>;
    /// Only the inventory ledger calls this
    async fn write_available_copies(&mut self, book_id: Uuid, value: i32) -> AppResult<()>;
    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()>;
    async fn lock_loan(&mut self, id: Uuid) -> AppResult<Option<Loan>>;
    async fn close_loan(&mut self, id: Uuid, returned_at: DateTime<Utc>) -> AppResult<Loan>;
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Loan selection for read-side listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoanFilter {
    pub user_id: Option<Uuid>,
    pub book_id: Option<Uuid>,
    pub open_only: bool,
}

impl LoanFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn open_for_book(book_id: Uuid) -> Self {
        Self {
            book_id: Some(book_id),
            open_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.user_id.map_or(true, |id| loan.user_id == id)
            && self.book_id.map_or(true, |id| loan.book_id == id)
            && (!self.open_only || loan.is_open())
    }
}

/// A stored loan joined with its book and borrower
#[derive(Debug, Clone, PartialEq)]
pub struct LoanRecord {
    pub loan: Loan,
    pub book: BookShort,
    pub user: UserShort,
}

impl LoanRecord {
    pub fn into_details(self, now: DateTime<Utc>) -> LoanDetails {
        LoanDetails::new(&self.loan, self.book, self.user, now)
    }
}

/// Main repository struct holding one handle per store
#[derive(Clone)]
pub struct Repository {
    pub books: Arc<dyn BookStore>,
    pub users: Arc<dyn UserStore>,
    pub loans: Arc<dyn LoanStore>,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: Arc::new(books::BooksRepository::new(pool.clone())),
            users: Arc::new(users::UsersRepository::new(pool.clone())),
            loans: Arc::new(loans::LoansRepository::new(pool)),
        }
    }

    /// Repository backed by process memory
    pub fn in_memory() -> Self {
        Self::from_memory(memory::MemoryStore::default())
    }

    pub fn from_memory(store: memory::MemoryStore) -> Self {
        Self {
            books: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            loans: Arc::new(store),
        }
    }
}

/// Turn a unique-constraint violation into a conflict error
pub(crate) fn conflict_on_unique(error: sqlx::Error, message: impl Into<String>) -> AppError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message.into()),
        _ => AppError::Database(error),
    }
}
