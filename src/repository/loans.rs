//! Loans repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        author::AuthorShort,
        book::{Book, BookShort},
        loan::{Loan, LoanStatus},
        user::UserShort,
    },
};

use super::{LendingTx, LoanFilter, LoanRecord, LoanStore};

const LOAN_RECORD_SELECT: &str = r#"
    SELECT l.id, l.book_id, l.user_id, l.borrow_date, l.due_date, l.return_date, l.status,
           b.title AS book_title, b.isbn AS book_isbn,
           a.id AS author_id, a.name AS author_name,
           u.name AS user_name, u.email AS user_email
    FROM loans l
    JOIN books b ON b.id = l.book_id
    JOIN authors a ON a.id = b.author_id
    JOIN users u ON u.id = l.user_id
"#;

fn loan_record_from_row(row: &PgRow) -> Result<LoanRecord, sqlx::Error> {
    let loan = Loan {
        id: row.try_get("id")?,
        book_id: row.try_get("book_id")?,
        user_id: row.try_get("user_id")?,
        borrow_date: row.try_get("borrow_date")?,
        due_date: row.try_get("due_date")?,
        return_date: row.try_get("return_date")?,
        status: row.try_get("status")?,
    };

    Ok(LoanRecord {
        book: BookShort {
            id: loan.book_id,
            title: row.try_get("book_title")?,
            isbn: row.try_get("book_isbn")?,
            author: AuthorShort {
                id: row.try_get("author_id")?,
                name: row.try_get("author_name")?,
            },
        },
        user: UserShort {
            id: loan.user_id,
            name: row.try_get("user_name")?,
            email: row.try_get("user_email")?,
        },
        loan,
    })
}

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoanStore for LoansRepository {
    async fn begin(&self) -> AppResult<Box<dyn LendingTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLendingTx { tx }))
    }

    /// Get loan by ID
    async fn get_loan(&self, id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn get_loan_record(&self, id: Uuid) -> AppResult<Option<LoanRecord>> {
        let query = format!("{} WHERE l.id = $1", LOAN_RECORD_SELECT);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(loan_record_from_row).transpose()?)
    }

    async fn list_loan_records(&self, filter: LoanFilter) -> AppResult<Vec<LoanRecord>> {
        let query = format!(
            r#"{}
            WHERE ($1::uuid IS NULL OR l.user_id = $1)
              AND ($2::uuid IS NULL OR l.book_id = $2)
              AND (NOT $3 OR l.status = $4)
            ORDER BY l.borrow_date DESC
            "#,
            LOAN_RECORD_SELECT
        );

        let rows = sqlx::query(&query)
            .bind(filter.user_id)
            .bind(filter.book_id)
            .bind(filter.open_only)
            .bind(LoanStatus::Open)
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .iter()
            .map(loan_record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn count_open_for_book(&self, book_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = $1 AND status = $2")
            .bind(book_id)
            .bind(LoanStatus::Open)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count active loans
    async fn count_active(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE status = $1")
            .bind(LoanStatus::Open)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count overdue loans
    async fn count_overdue(&self, now: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE status = $1 AND due_date < $2",
        )
        .bind(LoanStatus::Open)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Lending transaction on a pooled Postgres connection.
///
/// `sqlx` rolls the transaction back when it is dropped uncommitted.
pub struct PgLendingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LendingTx for PgLendingTx {
    async fn lock_book(&mut self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(book)
    }

    async fn write_available_copies(&mut self, book_id: Uuid, value: i32) -> AppResult<()> {
        let result = sqlx::query("UPDATE books SET available_copies = $1, updated_at = NOW() WHERE id = $2")
            .bind(value)
            .bind(book_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::BookNotFound(book_id));
        }
        Ok(())
    }

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, book_id, user_id, borrow_date, due_date, return_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(loan.id)
        .bind(loan.book_id)
        .bind(loan.user_id)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.status)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_loan(&mut self, id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(loan)
    }

    async fn close_loan(&mut self, id: Uuid, returned_at: DateTime<Utc>) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            "UPDATE loans SET status = $1, return_date = $2 WHERE id = $3 RETURNING *",
        )
        .bind(LoanStatus::Closed)
        .bind(returned_at)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(AppError::LoanNotFound(id))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
