//! Data models for the lending server

pub mod author;
pub mod book;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use author::{Author, AuthorDetails, AuthorShort};
pub use book::{Book, BookDetails, BookShort, LedgerReport};
pub use loan::{Loan, LoanDetails, LoanStatus};
pub use user::{User, UserShort};
