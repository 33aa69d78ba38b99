//! Loan lifecycle management.
//!
//! The only place that opens or closes loans, and the only caller of the
//! inventory ledger. A loan is created `Open` by [`LoansService::borrow`] and
//! moved to the terminal `Closed` state by [`LoansService::return_loan`]. Each
//! transition and its ledger update commit together or not at all.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{
        author::AuthorShort,
        book::BookShort,
        loan::{CreateLoan, Loan, LoanDetails, LoanStats},
        user::UserShort,
    },
    repository::{LoanFilter, Repository},
};

use super::ledger;

/// Log a refused transition at a level matching its cause
fn refused(action: &str, error: AppError) -> AppError {
    if error.is_not_found() || error.is_state_conflict() {
        tracing::warn!("{} refused: {}", action, error);
    } else {
        tracing::error!("{} failed: {}", action, error);
    }
    error
}

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    clock: Arc<dyn Clock>,
}

impl LoansService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Borrow a copy of a book
    pub async fn borrow(&self, request: CreateLoan) -> AppResult<LoanDetails> {
        let CreateLoan { user_id, book_id, due_date } = request;

        let user = self
            .repository
            .users
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;
        let book = self
            .repository
            .books
            .get_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound(book_id))?;
        let author = self
            .repository
            .books
            .get_author(book.author_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Book {} references a missing author", book_id)))?;

        let loan = Loan::open(book_id, user_id, self.clock.now(), due_date);

        let mut tx = self.repository.loans.begin().await?;
        let book = match ledger::reserve_copy(tx.as_mut(), book_id).await {
            Ok(book) => book,
            Err(e) => return Err(refused("Borrow", e.into())),
        };
        tx.insert_loan(&loan).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = %loan.id,
            %book_id,
            %user_id,
            available_copies = book.available_copies,
            "Book borrowed"
        );

        // From the rows in hand, not re-read after commit
        let book = BookShort {
            id: book.id,
            title: book.title,
            isbn: book.isbn,
            author: AuthorShort::from(&author),
        };
        Ok(LoanDetails::new(&loan, book, UserShort::from(&user), self.clock.now()))
    }

    /// Return a borrowed book
    pub async fn return_loan(&self, loan_id: Uuid) -> AppResult<LoanDetails> {
        let record = self
            .repository
            .loans
            .get_loan_record(loan_id)
            .await?
            .ok_or(AppError::LoanNotFound(loan_id))?;

        if !record.loan.is_open() {
            return Err(refused("Return", AppError::AlreadyReturned(loan_id)));
        }

        let returned_at = self.clock.now();

        let mut tx = self.repository.loans.begin().await?;
        // A concurrent return may have closed the loan since the check above
        let loan = tx
            .lock_loan(loan_id)
            .await?
            .ok_or(AppError::LoanNotFound(loan_id))?;
        if !loan.is_open() {
            return Err(refused("Return", AppError::AlreadyReturned(loan_id)));
        }

        let book = match ledger::release_copy(tx.as_mut(), loan.book_id).await {
            Ok(book) => book,
            Err(e) => return Err(refused("Return", e.into())),
        };
        let closed = tx.close_loan(loan_id, returned_at).await?;
        tx.commit().await?;

        tracing::info!(
            %loan_id,
            book_id = %closed.book_id,
            available_copies = book.available_copies,
            "Book returned"
        );

        Ok(LoanDetails::new(&closed, record.book, record.user, self.clock.now()))
    }

    /// Get one loan with its book and borrower
    pub async fn get_loan(&self, loan_id: Uuid) -> AppResult<LoanDetails> {
        let record = self
            .repository
            .loans
            .get_loan_record(loan_id)
            .await?
            .ok_or(AppError::LoanNotFound(loan_id))?;
        Ok(record.into_details(self.clock.now()))
    }

    /// Get loans for a user, most recent first
    pub async fn get_user_loans(&self, user_id: Uuid) -> AppResult<Vec<LoanDetails>> {
        // Verify user exists
        self.repository
            .users
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;

        self.list(LoanFilter::for_user(user_id)).await
    }

    /// Get every loan, most recent first
    pub async fn get_all_loans(&self) -> AppResult<Vec<LoanDetails>> {
        self.list(LoanFilter::all()).await
    }

    pub(crate) async fn list(&self, filter: LoanFilter) -> AppResult<Vec<LoanDetails>> {
        let now = self.clock.now();
        let records = self.repository.loans.list_loan_records(filter).await?;
        Ok(records.into_iter().map(|r| r.into_details(now)).collect())
    }

    /// Count active and overdue loans
    pub async fn stats(&self) -> AppResult<LoanStats> {
        let loans = &self.repository.loans;
        Ok(LoanStats {
            active: loans.count_active().await?,
            overdue: loans.count_overdue(self.clock.now()).await?,
        })
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.repository.loans.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{MockClock, SystemClock},
        models::{author::CreateAuthor, book::CreateBook, loan::LoanStatus, user::CreateUser},
        repository::{memory::MemoryStore, LendingTx, LoanRecord, LoanStore},
        services::catalog::CatalogService,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        repository: Repository,
        catalog: CatalogService,
        loans: LoansService,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_clock(Arc::new(SystemClock))
        }

        fn with_clock(clock: Arc<dyn Clock>) -> Self {
            Self::with_repository(Repository::in_memory(), clock)
        }

        fn with_repository(repository: Repository, clock: Arc<dyn Clock>) -> Self {
            Self {
                catalog: CatalogService::new(repository.clone(), clock.clone()),
                loans: LoansService::new(repository.clone(), clock),
                repository,
            }
        }

        async fn user(&self, name: &str) -> Uuid {
            let user = self
                .catalog
                .create_user(CreateUser {
                    name: name.to_string(),
                    email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
                })
                .await
                .unwrap();
            user.id
        }

        async fn book(&self, isbn: &str, copies: i32) -> Uuid {
            let author = self
                .catalog
                .create_author(CreateAuthor {
                    name: "George R.R. Martin".to_string(),
                    biography: None,
                    country: None,
                })
                .await
                .unwrap();
            let book = self
                .catalog
                .create_book(CreateBook {
                    title: "A Game of Thrones".to_string(),
                    isbn: isbn.to_string(),
                    author_id: author.id,
                    genre: Some("Fantasy".to_string()),
                    published_date: None,
                    total_copies: copies,
                })
                .await
                .unwrap();
            book.id
        }

        async fn available(&self, book_id: Uuid) -> i32 {
            self.repository
                .books
                .get_book(book_id)
                .await
                .unwrap()
                .unwrap()
                .available_copies
        }

        /// available == total - open loans, and within [0, total]
        async fn assert_ledger_consistent(&self, book_id: Uuid) {
            let report = self.catalog.ledger_report(book_id).await.unwrap();
            assert!(report.consistent, "inconsistent ledger: {:?}", report);
        }

        fn request(&self, user_id: Uuid, book_id: Uuid) -> CreateLoan {
            CreateLoan {
                user_id,
                book_id,
                due_date: Utc::now() + Duration::days(14),
            }
        }
    }

    /// Loan store whose joined reads fail, for checking that writes do not
    /// depend on reading their own result back
    struct BrokenReads(MemoryStore);

    #[async_trait]
    impl LoanStore for BrokenReads {
        async fn begin(&self) -> AppResult<Box<dyn LendingTx>> {
            self.0.begin().await
        }
        async fn get_loan(&self, id: Uuid) -> AppResult<Option<Loan>> {
            self.0.get_loan(id).await
        }
        async fn get_loan_record(&self, _id: Uuid) -> AppResult<Option<LoanRecord>> {
            Err(AppError::Internal("read replica unavailable".to_string()))
        }
        async fn list_loan_records(&self, _filter: LoanFilter) -> AppResult<Vec<LoanRecord>> {
            Err(AppError::Internal("read replica unavailable".to_string()))
        }
        async fn count_open_for_book(&self, book_id: Uuid) -> AppResult<i64> {
            self.0.count_open_for_book(book_id).await
        }
        async fn count_active(&self) -> AppResult<i64> {
            self.0.count_active().await
        }
        async fn count_overdue(&self, now: DateTime<Utc>) -> AppResult<i64> {
            self.0.count_overdue(now).await
        }
        async fn ping(&self) -> AppResult<()> {
            self.0.ping().await
        }
    }

    fn stepping_clock(start: DateTime<Utc>) -> MockClock {
        let mut clock = MockClock::new();
        let mut now = start;
        clock.expect_now().returning(move || {
            now += Duration::minutes(1);
            now
        });
        clock
    }

    #[tokio::test]
    async fn single_copy_borrow_return_cycle() {
        let fx = Fixture::new();
        let alice = fx.user("Alice").await;
        let bob = fx.user("Bob").await;
        let book = fx.book("9780553103540", 1).await;

        let loan = fx.loans.borrow(fx.request(alice, book)).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Open);
        assert!(loan.return_date.is_none());
        assert_eq!(loan.book.id, book);
        assert_eq!(loan.user.id, alice);
        assert_eq!(fx.available(book).await, 0);

        let err = fx.loans.borrow(fx.request(bob, book)).await.unwrap_err();
        assert!(matches!(err, AppError::BookUnavailable(id) if id == book));
        assert_eq!(fx.available(book).await, 0);

        let returned = fx.loans.return_loan(loan.id).await.unwrap();
        assert_eq!(returned.status, LoanStatus::Closed);
        assert!(returned.return_date.is_some());
        assert_eq!(fx.available(book).await, 1);
        fx.assert_ledger_consistent(book).await;
    }

    #[tokio::test]
    async fn borrow_then_return_restores_availability() {
        let fx = Fixture::new();
        let user = fx.user("Carol").await;
        let book = fx.book("9780553108033", 4).await;

        let before = fx.available(book).await;
        let loan = assert_ok!(fx.loans.borrow(fx.request(user, book)).await);
        assert_eq!(fx.available(book).await, before - 1);
        assert_ok!(fx.loans.return_loan(loan.id).await);
        assert_eq!(fx.available(book).await, before);
    }

    #[tokio::test]
    async fn second_return_is_refused_without_side_effects() {
        let fx = Fixture::new();
        let user = fx.user("Dave").await;
        let book = fx.book("9780553106633", 2).await;

        let loan = fx.loans.borrow(fx.request(user, book)).await.unwrap();
        let first = fx.loans.return_loan(loan.id).await.unwrap();
        let available = fx.available(book).await;

        let err = fx.loans.return_loan(loan.id).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyReturned(id) if id == loan.id));

        let after = fx.loans.get_loan(loan.id).await.unwrap();
        assert_eq!(after.return_date, first.return_date);
        assert_eq!(after.status, LoanStatus::Closed);
        assert_eq!(fx.available(book).await, available);
        fx.assert_ledger_consistent(book).await;
    }

    #[tokio::test]
    async fn returning_unknown_loan_fails() {
        let fx = Fixture::new();
        let missing = Uuid::new_v4();

        let err = fx.loans.return_loan(missing).await.unwrap_err();
        assert!(matches!(err, AppError::LoanNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn borrowing_unknown_book_changes_nothing() {
        let fx = Fixture::new();
        let user = fx.user("Erin").await;
        let book = fx.book("9780553801507", 2).await;

        let err = fx
            .loans
            .borrow(fx.request(user, Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BookNotFound(_)));
        assert!(fx.loans.get_all_loans().await.unwrap().is_empty());
        assert_eq!(fx.available(book).await, 2);
    }

    #[tokio::test]
    async fn user_is_checked_before_book() {
        let fx = Fixture::new();
        let missing_user = Uuid::new_v4();

        let err = fx
            .loans
            .borrow(fx.request(missing_user, Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UserNotFound(id) if id == missing_user));

        assert_err!(fx.loans.get_user_loans(missing_user).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_borrows_never_over_allocate() {
        let fx = Fixture::new();
        let copies = 5;
        let book = fx.book("9780345535528", copies).await;

        let mut handles = Vec::new();
        for i in 0..=copies {
            let user = fx.user(&format!("Reader {}", i)).await;
            let loans = fx.loans.clone();
            let request = fx.request(user, book);
            handles.push(tokio::spawn(async move { loans.borrow(request).await }));
        }

        let mut succeeded = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::BookUnavailable(_)) => refused += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(succeeded, copies);
        assert_eq!(refused, 1);
        assert_eq!(fx.available(book).await, 0);
        fx.assert_ledger_consistent(book).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_returns_close_the_loan_once() {
        let fx = Fixture::new();
        let user = fx.user("Frank").await;
        let book = fx.book("9780345539809", 3).await;
        let loan_id = fx.loans.borrow(fx.request(user, book)).await.unwrap().id;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let loans = fx.loans.clone();
                tokio::spawn(async move { loans.return_loan(loan_id).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(e) => assert!(matches!(e, AppError::AlreadyReturned(_))),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(fx.available(book).await, 3);
    }

    #[tokio::test]
    async fn ledger_holds_across_mixed_sequence() {
        let fx = Fixture::new();
        let book = fx.book("9780261103573", 3).await;
        let mut open = Vec::new();

        for step in 0..10 {
            let user = fx.user(&format!("Member {}", step)).await;
            if step % 3 == 2 {
                if let Some(loan_id) = open.pop() {
                    fx.loans.return_loan(loan_id).await.unwrap();
                }
            } else {
                match fx.loans.borrow(fx.request(user, book)).await {
                    Ok(loan) => open.push(loan.id),
                    Err(e) => assert!(matches!(e, AppError::BookUnavailable(_))),
                }
            }

            let available = fx.available(book).await;
            assert!((0..=3).contains(&available));
            fx.assert_ledger_consistent(book).await;
        }
    }

    #[tokio::test]
    async fn listings_are_newest_first_and_filtered_by_user() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let fx = Fixture::with_clock(Arc::new(stepping_clock(start)));
        let grace = fx.user("Grace").await;
        let heidi = fx.user("Heidi").await;
        let book = fx.book("9780007136834", 5).await;

        let first = fx.loans.borrow(fx.request(grace, book)).await.unwrap();
        let second = fx.loans.borrow(fx.request(heidi, book)).await.unwrap();
        let third = fx.loans.borrow(fx.request(grace, book)).await.unwrap();

        let all: Vec<Uuid> = fx.loans.get_all_loans().await.unwrap().iter().map(|l| l.id).collect();
        assert_eq!(all, vec![third.id, second.id, first.id]);

        let graces: Vec<Uuid> = fx
            .loans
            .get_user_loans(grace)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(graces, vec![third.id, first.id]);
    }

    #[tokio::test]
    async fn overdue_is_derived_for_open_loans_only() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let fx = Fixture::with_clock(Arc::new(stepping_clock(start)));
        let user = fx.user("Ivan").await;
        let book = fx.book("9780618640157", 2).await;

        // Due before the clock's next tick
        let late = CreateLoan {
            user_id: user,
            book_id: book,
            due_date: start,
        };
        let on_time = CreateLoan {
            due_date: start + Duration::days(30),
            ..late.clone()
        };

        let late = fx.loans.borrow(late).await.unwrap();
        let on_time = fx.loans.borrow(on_time).await.unwrap();
        assert!(late.is_overdue);
        assert!(!on_time.is_overdue);

        let stats = fx.loans.stats().await.unwrap();
        assert_eq!(stats, LoanStats { active: 2, overdue: 1 });

        let returned = fx.loans.return_loan(late.id).await.unwrap();
        assert!(!returned.is_overdue);
        assert_eq!(fx.loans.stats().await.unwrap(), LoanStats { active: 1, overdue: 0 });
    }

    #[tokio::test]
    async fn committed_borrow_is_reported_without_reading_it_back() {
        let store = MemoryStore::default();
        let seeded = Fixture::with_repository(Repository::from_memory(store.clone()), Arc::new(SystemClock));
        let user = seeded.user("Judy").await;
        let book = seeded.book("9780553573404", 2).await;

        let repository = Repository {
            books: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            loans: Arc::new(BrokenReads(store.clone())),
        };
        let loans = LoansService::new(repository, Arc::new(SystemClock));

        let loan = loans.borrow(seeded.request(user, book)).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Open);
        assert_eq!(loan.book.id, book);
        assert_eq!(loan.book.author.name, "George R.R. Martin");
        assert_eq!(loan.user.id, user);

        // The write really landed
        assert_eq!(seeded.available(book).await, 1);
        assert_eq!(store.get_loan(loan.id).await.unwrap().map(|l| l.id), Some(loan.id));
    }

    #[test]
    fn refusals_pass_the_error_through() {
        let id = Uuid::new_v4();
        assert!(matches!(refused("Borrow", AppError::BookUnavailable(id)), AppError::BookUnavailable(i) if i == id));
        assert!(matches!(refused("Return", AppError::LoanNotFound(id)), AppError::LoanNotFound(_)));
        assert!(matches!(
            refused("Borrow", AppError::Internal("lock lost".to_string())),
            AppError::Internal(_)
        ));
    }
}
