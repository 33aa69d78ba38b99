//! Loan (borrowed book) model and related types

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::ToSchema;
use uuid::Uuid;

use super::book::BookShort;
use super::user::UserShort;

/// Loan state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// Borrowed, not yet returned
    Open,
    /// Returned
    Closed,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Open => "open",
            LoanStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(LoanStatus::Open),
            "closed" => Ok(LoanStatus::Closed),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

// SQLx conversion for LoanStatus (stored as TEXT)
impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// Loan model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: Uuid,
    pub book_id: Uuid,
    pub user_id: Uuid,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    /// Set iff `status` is `Closed`
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
}

impl Loan {
    /// A freshly borrowed loan
    pub fn open(book_id: Uuid, user_id: Uuid, borrow_date: DateTime<Utc>, due_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            user_id,
            borrow_date,
            due_date,
            return_date: None,
            status: LoanStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == LoanStatus::Open
    }

    /// Overdue is derived on read, never stored
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_date < now
    }
}

/// Loan with book and borrower details for display
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub id: Uuid,
    pub book: BookShort,
    pub user: UserShort,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub is_overdue: bool,
}

impl LoanDetails {
    pub fn new(loan: &Loan, book: BookShort, user: UserShort, now: DateTime<Utc>) -> Self {
        Self {
            id: loan.id,
            book,
            user,
            borrow_date: loan.borrow_date,
            due_date: loan.due_date,
            return_date: loan.return_date,
            status: loan.status,
            is_overdue: loan.is_overdue(now),
        }
    }
}

/// Borrow request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateLoan {
    pub user_id: Uuid,
    pub book_id: Uuid,
    /// Due date: an RFC 3339 timestamp, or `YYYY-MM-DD` for midnight UTC
    #[serde(deserialize_with = "deserialize_due_date")]
    #[schema(value_type = String, example = "2024-12-17")]
    pub due_date: DateTime<Utc>,
}

/// Parse a due date given either as a full timestamp or as a bare date
pub fn parse_due_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .ok_or_else(|| format!("invalid due_date '{}': expected RFC 3339 or YYYY-MM-DD", raw))
}

fn deserialize_due_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_due_date(&raw).map_err(serde::de::Error::custom)
}

/// Loan counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LoanStats {
    pub active: i64,
    pub overdue: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("OPEN".parse::<LoanStatus>(), Ok(LoanStatus::Open));
        assert_eq!("closed".parse::<LoanStatus>(), Ok(LoanStatus::Closed));
        assert!("overdue".parse::<LoanStatus>().is_err());
    }

    #[test]
    fn overdue_only_applies_to_open_loans() {
        let now = Utc::now();
        let mut loan = Loan::open(Uuid::new_v4(), Uuid::new_v4(), now - Duration::days(30), now - Duration::days(1));
        assert!(loan.is_overdue(now));
        assert!(!loan.is_overdue(now - Duration::days(2)));

        loan.status = LoanStatus::Closed;
        loan.return_date = Some(now);
        assert!(!loan.is_overdue(now));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&LoanStatus::Open).unwrap();
        assert_eq!(json, "\"open\"");
    }

    #[test]
    fn due_date_accepts_timestamp_or_bare_date() {
        let midnight = Utc.with_ymd_and_hms(2024, 12, 17, 0, 0, 0).unwrap();
        assert_eq!(parse_due_date("2024-12-17"), Ok(midnight));
        assert_eq!(parse_due_date("2024-12-17T00:00:00Z"), Ok(midnight));
        assert_eq!(
            parse_due_date("2024-12-17T02:00:00+02:00"),
            Ok(midnight)
        );
        assert!(parse_due_date("17/12/2024").is_err());
        assert!(parse_due_date("2024-02-30").is_err());
    }

    #[test]
    fn borrow_request_takes_a_bare_due_date() {
        let request: CreateLoan = serde_json::from_value(serde_json::json!({
            "user_id": Uuid::nil(),
            "book_id": Uuid::nil(),
            "due_date": "2024-12-17",
        }))
        .unwrap();
        assert_eq!(request.due_date, Utc.with_ymd_and_hms(2024, 12, 17, 0, 0, 0).unwrap());

        let bad = serde_json::from_value::<CreateLoan>(serde_json::json!({
            "user_id": Uuid::nil(),
            "book_id": Uuid::nil(),
            "due_date": "next tuesday",
        }));
        assert!(bad.is_err());
    }
}
