//! Catalogue service: books, authors and borrowers.
//!
//! Plain passthrough to storage apart from one rule: a new book starts with
//! every copy available.

use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{
        author::{Author, AuthorDetails, AuthorShort, CreateAuthor},
        book::{Book, BookDetails, CreateBook, LedgerReport, UpdateBook},
        user::{CreateUser, User},
    },
    repository::{LoanFilter, Repository},
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn create_author(&self, request: CreateAuthor) -> AppResult<Author> {
        request.validate()?;

        let author = Author {
            id: Uuid::new_v4(),
            name: request.name,
            biography: request.biography,
            country: request.country,
            created_at: self.clock.now(),
        };
        self.repository.books.insert_author(&author).await?;
        Ok(author)
    }

    pub async fn get_author(&self, id: Uuid) -> AppResult<Author> {
        self.repository
            .books
            .get_author(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Author with id {} not found", id)))
    }

    /// Authors sorted by name
    pub async fn list_authors(&self) -> AppResult<Vec<Author>> {
        self.repository.books.list_authors().await
    }

    /// An author with each of their books and its copy counts
    pub async fn get_author_details(&self, id: Uuid) -> AppResult<AuthorDetails> {
        let author = self.get_author(id).await?;
        let books = self.repository.books.list_books_by_author(id).await?;
        Ok(AuthorDetails { author, books })
    }

    pub async fn create_user(&self, request: CreateUser) -> AppResult<User> {
        request.validate()?;

        let user = User {
            id: Uuid::new_v4(),
            name: request.name,
            email: request.email,
            created_at: self.clock.now(),
        };
        self.repository.users.insert_user(&user).await?;
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> AppResult<User> {
        self.repository
            .users
            .get_user(id)
            .await?
            .ok_or(AppError::UserNotFound(id))
    }

    /// Create a book with all copies available
    pub async fn create_book(&self, request: CreateBook) -> AppResult<Book> {
        request.validate()?;

        self.repository
            .books
            .get_author(request.author_id)
            .await?
            .ok_or_else(|| AppError::Validation(format!("Author {} not found", request.author_id)))?;

        let now = self.clock.now();
        let book = Book {
            id: Uuid::new_v4(),
            author_id: request.author_id,
            title: request.title,
            isbn: request.isbn,
            genre: request.genre,
            published_date: request.published_date,
            total_copies: request.total_copies,
            available_copies: request.total_copies,
            created_at: now,
            updated_at: now,
        };
        self.repository.books.insert_book(&book).await?;

        tracing::info!(book_id = %book.id, copies = book.total_copies, "Book added to catalogue");
        Ok(book)
    }

    pub async fn list_books(&self) -> AppResult<Vec<Book>> {
        self.repository.books.list_books().await
    }

    /// Get a book with its author and open loans
    pub async fn get_book(&self, id: Uuid) -> AppResult<BookDetails> {
        let book = self
            .repository
            .books
            .get_book(id)
            .await?
            .ok_or(AppError::BookNotFound(id))?;
        let author = self
            .repository
            .books
            .get_author(book.author_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Book {} references a missing author", id)))?;

        let now = self.clock.now();
        let open_loans = self
            .repository
            .loans
            .list_loan_records(LoanFilter::open_for_book(id))
            .await?
            .into_iter()
            .map(|r| r.into_details(now))
            .collect();

        Ok(BookDetails {
            author: AuthorShort::from(&author),
            book,
            open_loans,
        })
    }

    /// Administrative edit. May desynchronize the ledger when `total_copies`
    /// changes while copies are out.
    pub async fn update_book(&self, id: Uuid, request: UpdateBook) -> AppResult<Book> {
        request.validate()?;

        let book = self
            .repository
            .books
            .update_book(id, &request, self.clock.now())
            .await?
            .ok_or(AppError::BookNotFound(id))?;

        if request.total_copies.is_some() {
            tracing::info!(
                book_id = %id,
                total_copies = book.total_copies,
                available_copies = book.available_copies,
                "Total copies changed by administrator"
            );
        }
        Ok(book)
    }

    /// Compare the ledger counters with the open loans on record
    pub async fn ledger_report(&self, id: Uuid) -> AppResult<LedgerReport> {
        let book = self
            .repository
            .books
            .get_book(id)
            .await?
            .ok_or(AppError::BookNotFound(id))?;
        let open_loans = self.repository.loans.count_open_for_book(id).await?;

        let report = LedgerReport::new(&book, open_loans);
        if !report.consistent {
            tracing::warn!(
                book_id = %id,
                total_copies = report.total_copies,
                available_copies = report.available_copies,
                open_loans,
                "Ledger out of step with open loans"
            );
        }
        Ok(report)
    }
}
