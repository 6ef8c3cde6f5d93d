use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Lifecycle label of an application. Any status may move to any other;
/// there is no transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Applied,
    Shortlisted,
    Interviewing,
    Offer,
    Rejected,
    Withdrawn,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "APPLIED",
            Self::Shortlisted => "SHORTLISTED",
            Self::Interviewing => "INTERVIEWING",
            Self::Offer => "OFFER",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPLIED" => Some(Self::Applied),
            "SHORTLISTED" => Some(Self::Shortlisted),
            "INTERVIEWING" => Some(Self::Interviewing),
            "OFFER" => Some(Self::Offer),
            "REJECTED" => Some(Self::Rejected),
            "WITHDRAWN" => Some(Self::Withdrawn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundResult {
    Passed,
    Failed,
    Pending,
    Skipped,
}

impl RoundResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Pending => "PENDING",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASSED" => Some(Self::Passed),
            "FAILED" => Some(Self::Failed),
            "PENDING" => Some(Self::Pending),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }
}

// Stored as TEXT; a row carrying a value outside the closed set fails the
// column conversion, which the ops layer reports as a schema mismatch.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                Self::parse(s).ok_or_else(|| {
                    FromSqlError::Other(
                        format!("unexpected {} value: {s:?}", stringify!($ty)).into(),
                    )
                })
            }
        }
    };
}

sql_text_enum!(Status);
sql_text_enum!(Priority);
sql_text_enum!(RoundResult);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub career_page_url: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub user_id: String,
    pub company_id: i64,
    pub company_name: String, // denormalized from the companies join
    pub company_location: Option<String>,
    pub role_title: String,
    pub job_link: Option<String>,
    pub source: Option<String>,
    pub status: Status,
    pub priority: Option<Priority>,
    pub general_notes: Option<String>,
    pub applied_date: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One immutable entry in an application's status audit trail.
/// `previous_status` is NULL only for the creation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub job_application_id: i64,
    pub previous_status: Option<Status>,
    pub new_status: Status,
    pub notes: Option<String>,
    pub changed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewRound {
    pub id: i64,
    pub job_application_id: i64,
    pub round_number: i64,
    pub round_type: String,
    pub interview_date: Option<String>,
    pub interviewer_name: Option<String>,
    pub meeting_link: Option<String>,
    pub result: RoundResult,
    pub questions_asked: Option<String>,
    pub feedback_received: Option<String>,
    pub personal_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// An application together with its audit trail and interview rounds,
/// as returned by the detail view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationDetail {
    pub application: Application,
    pub history: Vec<HistoryEntry>,
    pub rounds: Vec<InterviewRound>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_applications: i64,
    pub active_interviews: i64,
    pub offers: i64,
    pub rejections: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: Status,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsData {
    pub daily_trend: Vec<DailyCount>,
    pub status_distribution: Vec<StatusCount>,
}
