//! Books and authors repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        author::Author,
        book::{Book, UpdateBook},
    },
};

use super::{conflict_on_unique, BookStore};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookStore for BooksRepository {
    /// Get book by ID
    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>("SELECT * FROM books ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(books)
    }

    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO books (
                id, author_id, title, isbn, genre, published_date,
                total_copies, available_copies, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(book.id)
        .bind(book.author_id)
        .bind(&book.title)
        .bind(&book.isbn)
        .bind(&book.genre)
        .bind(book.published_date)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, format!("A book with ISBN {} already exists", book.isbn)))?;

        Ok(())
    }

    async fn update_book(&self, id: Uuid, update: &UpdateBook, now: DateTime<Utc>) -> AppResult<Option<Book>> {
        // available_copies is deliberately absent: only the ledger writes it
        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = COALESCE($2, title),
                isbn = COALESCE($3, isbn),
                genre = COALESCE($4, genre),
                published_date = COALESCE($5, published_date),
                total_copies = COALESCE($6, total_copies),
                updated_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.title)
        .bind(&update.isbn)
        .bind(&update.genre)
        .bind(update.published_date)
        .bind(update.total_copies)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Another book already uses this ISBN"))?;

        Ok(book)
    }

    async fn get_author(&self, id: Uuid) -> AppResult<Option<Author>> {
        let author = sqlx::query_as::<_, Author>("SELECT * FROM authors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(author)
    }

    async fn list_authors(&self) -> AppResult<Vec<Author>> {
        let authors = sqlx::query_as::<_, Author>("SELECT * FROM authors ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(authors)
    }

    async fn list_books_by_author(&self, author_id: Uuid) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE author_id = $1 ORDER BY title, id")
            .bind(author_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(books)
    }

    async fn insert_author(&self, author: &Author) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO authors (id, name, biography, country, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(author.id)
        .bind(&author.name)
        .bind(&author.biography)
        .bind(&author.country)
        .bind(author.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
