//! In-process store.
//!
//! The whole state sits behind one async mutex. A [`MemoryLendingTx`] holds
//! that mutex for its lifetime and writes into a staged copy, so concurrent
//! transactions run one after another and an uncommitted transaction leaves
//! no trace.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        author::{Author, AuthorShort},
        book::{Book, BookShort, UpdateBook},
        loan::{Loan, LoanStatus},
        user::{User, UserShort},
    },
};

use super::{BookStore, LendingTx, LoanFilter, LoanRecord, LoanStore, UserStore};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    authors: HashMap<Uuid, Author>,
    users: HashMap<Uuid, User>,
    books: HashMap<Uuid, Book>,
    loans: HashMap<Uuid, Loan>,
}

impl MemoryState {
    fn loan_record(&self, loan: &Loan) -> Option<LoanRecord> {
        let book = self.books.get(&loan.book_id)?;
        let author = self.authors.get(&book.author_id)?;
        let user = self.users.get(&loan.user_id)?;

        Some(LoanRecord {
            loan: loan.clone(),
            book: BookShort {
                id: book.id,
                title: book.title.clone(),
                isbn: book.isbn.clone(),
                author: AuthorShort::from(author),
            },
            user: UserShort::from(user),
        })
    }

    fn isbn_taken(&self, isbn: &str, exclude: Option<Uuid>) -> bool {
        self.books
            .values()
            .any(|b| b.isbn == isbn && Some(b.id) != exclude)
    }
}

/// Store backed by process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookStore for MemoryStore {
    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state.books.values().cloned().collect();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(books)
    }

    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.isbn_taken(&book.isbn, None) {
            return Err(AppError::Conflict(format!("A book with ISBN {} already exists", book.isbn)));
        }
        state.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn update_book(&self, id: Uuid, update: &UpdateBook, now: DateTime<Utc>) -> AppResult<Option<Book>> {
        let mut state = self.state.lock().await;
        if let Some(isbn) = &update.isbn {
            if state.isbn_taken(isbn, Some(id)) {
                return Err(AppError::Conflict("Another book already uses this ISBN".to_string()));
            }
        }

        let Some(book) = state.books.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = &update.title {
            book.title = title.clone();
        }
        if let Some(isbn) = &update.isbn {
            book.isbn = isbn.clone();
        }
        if update.genre.is_some() {
            book.genre = update.genre.clone();
        }
        if update.published_date.is_some() {
            book.published_date = update.published_date;
        }
        if let Some(total) = update.total_copies {
            book.total_copies = total;
        }
        book.updated_at = now;

        Ok(Some(book.clone()))
    }

    async fn get_author(&self, id: Uuid) -> AppResult<Option<Author>> {
        Ok(self.state.lock().await.authors.get(&id).cloned())
    }

    async fn list_authors(&self) -> AppResult<Vec<Author>> {
        let state = self.state.lock().await;
        let mut authors: Vec<Author> = state.authors.values().cloned().collect();
        authors.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(authors)
    }

    async fn list_books_by_author(&self, author_id: Uuid) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| b.author_id == author_id)
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn insert_author(&self, author: &Author) -> AppResult<()> {
        self.state.lock().await.authors.insert(author.id, author.clone());
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let taken = state
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email));
        if taken {
            return Err(AppError::Conflict(format!("Email {} is already registered", user.email)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn LendingTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryLendingTx { guard, staged }))
    }

    async fn get_loan(&self, id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self.state.lock().await.loans.get(&id).cloned())
    }

    async fn get_loan_record(&self, id: Uuid) -> AppResult<Option<LoanRecord>> {
        let state = self.state.lock().await;
        Ok(state.loans.get(&id).and_then(|loan| state.loan_record(loan)))
    }

    async fn list_loan_records(&self, filter: LoanFilter) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<LoanRecord> = state
            .loans
            .values()
            .filter(|loan| filter.matches(loan))
            .filter_map(|loan| state.loan_record(loan))
            .collect();
        records.sort_by(|a, b| b.loan.borrow_date.cmp(&a.loan.borrow_date));
        Ok(records)
    }

    async fn count_open_for_book(&self, book_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().await;
        let count = state
            .loans
            .values()
            .filter(|l| l.book_id == book_id && l.is_open())
            .count();
        Ok(count as i64)
    }

    async fn count_active(&self) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state.loans.values().filter(|l| l.is_open()).count() as i64)
    }

    async fn count_overdue(&self, now: DateTime<Utc>) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state.loans.values().filter(|l| l.is_overdue(now)).count() as i64)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Exclusive transaction over the in-memory state
pub struct MemoryLendingTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl LendingTx for MemoryLendingTx {
    async fn lock_book(&mut self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.staged.books.get(&id).cloned())
    }

    async fn write_available_copies(&mut self, book_id: Uuid, value: i32) -> AppResult<()> {
        let book = self
            .staged
            .books
            .get_mut(&book_id)
            .ok_or(AppError::BookNotFound(book_id))?;
        // Mirrors the CHECK constraint on the books table
        if value < 0 {
            return Err(AppError::Internal(format!(
                "available_copies of book {} would become negative",
                book_id
            )));
        }
        book.available_copies = value;
        Ok(())
    }

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        if !self.staged.books.contains_key(&loan.book_id) {
            return Err(AppError::BookNotFound(loan.book_id));
        }
        if !self.staged.users.contains_key(&loan.user_id) {
            return Err(AppError::UserNotFound(loan.user_id));
        }
        self.staged.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn lock_loan(&mut self, id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self.staged.loans.get(&id).cloned())
    }

    async fn close_loan(&mut self, id: Uuid, returned_at: DateTime<Utc>) -> AppResult<Loan> {
        let loan = self
            .staged
            .loans
            .get_mut(&id)
            .ok_or(AppError::LoanNotFound(id))?;
        loan.status = LoanStatus::Closed;
        loan.return_date = Some(returned_at);
        Ok(loan.clone())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryLendingTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
