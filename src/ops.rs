//! Operation layer: payload validation, owner-scoped CRUD contracts, and the
//! status-transition audit policy for application updates.
//!
//! Every operation returns `Result<_, OpError>` so callers always see one of
//! the four error kinds: bad input, a store failure on the primary write, a
//! missing/unauthorized row, or a row that failed shape validation. History
//! writes are best-effort and never become the caller-visible outcome.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::db::{ApplicationPatch, CompanyPatch, Database, RoundPatch};
use crate::models::{
    AnalyticsData, ApplicationDetail, DashboardStats, Priority, RoundResult, Status,
};

const CREATED_NOTE: &str = "Initial application created";
const STATUS_UPDATED_NOTE: &str = "Status updated";

#[derive(Debug, Error)]
pub enum OpError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Schema validation failed: {0}")]
    SchemaMismatch(String),
    #[error(transparent)]
    Store(anyhow::Error),
}

/// Classifies a store failure: rows that came back with an out-of-domain
/// column value are a schema mismatch, everything else is a plain store error.
fn store_err(err: anyhow::Error) -> OpError {
    for cause in err.chain() {
        if let Some(sql_err) = cause.downcast_ref::<rusqlite::Error>() {
            if matches!(
                sql_err,
                rusqlite::Error::FromSqlConversionFailure(..)
                    | rusqlite::Error::InvalidColumnType(..)
            ) {
                return OpError::SchemaMismatch(sql_err.to_string());
            }
        }
    }
    OpError::Store(err)
}

fn require_nonempty(value: &str, field: &str) -> Result<(), OpError> {
    if value.trim().is_empty() {
        return Err(OpError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Optional link fields accept a well-formed URL or an empty string; the
/// empty string is treated as absent and stored NULL.
fn normalize_link(link: Option<String>, field: &str) -> Result<Option<String>, OpError> {
    match link {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => {
            Url::parse(&s)
                .map_err(|_| OpError::Validation(format!("{field} must be a valid URL")))?;
            Ok(Some(s))
        }
    }
}

// --- Applications ---

#[derive(Debug, Clone)]
pub struct AddApplication {
    pub user_id: String,
    pub company_name: String,
    pub role_title: String,
    pub job_link: Option<String>,
    pub source: Option<String>,
    pub priority: Priority,
    pub status: Status,
    pub general_notes: Option<String>,
}

impl AddApplication {
    pub fn new(user_id: &str, company_name: &str, role_title: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            company_name: company_name.to_string(),
            role_title: role_title.to_string(),
            job_link: None,
            source: None,
            priority: Priority::Medium,
            status: Status::Applied,
            general_notes: None,
        }
    }
}

/// Creates the application, lazily finding or creating its company, and seeds
/// the audit trail with a NULL-previous entry. The seed is best-effort: if it
/// fails the application row stands and the operation still succeeds.
pub fn add_application(db: &Database, input: AddApplication) -> Result<i64, OpError> {
    require_nonempty(&input.user_id, "user_id")?;
    require_nonempty(&input.company_name, "Company name")?;
    require_nonempty(&input.role_title, "Role title")?;
    let job_link = normalize_link(input.job_link, "Job link")?;

    let company_id = db
        .get_or_create_company(&input.user_id, &input.company_name)
        .map_err(store_err)?;

    let application_id = db
        .insert_application(
            &input.user_id,
            company_id,
            &input.role_title,
            job_link.as_deref(),
            input.source.as_deref(),
            input.status,
            Some(input.priority),
            input.general_notes.as_deref(),
        )
        .map_err(store_err)?;

    if let Err(err) = db.insert_history_entry(application_id, None, input.status, CREATED_NOTE) {
        warn!(application_id, error = %err, "failed to seed application history");
    }

    Ok(application_id)
}

#[derive(Debug, Clone)]
pub struct UpdateApplication {
    pub id: i64,
    pub user_id: String,
    pub role_title: Option<String>,
    pub job_link: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub general_notes: Option<String>,
}

impl UpdateApplication {
    pub fn status_only(id: i64, user_id: &str, status: Status) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            role_title: None,
            job_link: None,
            status: Some(status),
            priority: None,
            general_notes: None,
        }
    }
}

/// Partial update with status-transition logging.
///
/// When the payload carries a status, the currently stored status is read
/// first and, if it differs, one history entry is appended before the row
/// update is issued, so `previous_status` always reflects the pre-update
/// value. Neither a failed status read nor a failed history insert blocks
/// the update; the caller-visible result is the row update's alone.
pub fn update_application(db: &Database, input: UpdateApplication) -> Result<(), OpError> {
    require_nonempty(&input.user_id, "user_id")?;
    if let Some(title) = &input.role_title {
        require_nonempty(title, "Role title")?;
    }
    let job_link = match &input.job_link {
        Some(s) if !s.is_empty() => {
            Url::parse(s)
                .map_err(|_| OpError::Validation("Job link must be a valid URL".into()))?;
            input.job_link.clone()
        }
        other => other.clone(),
    };

    if let Some(new_status) = input.status {
        match db.read_current_status(input.id, &input.user_id) {
            Ok(Some(current)) if current != new_status => {
                if let Err(err) = db.insert_history_entry(
                    input.id,
                    Some(current),
                    new_status,
                    STATUS_UPDATED_NOTE,
                ) {
                    warn!(application_id = input.id, error = %err,
                        "failed to append status history; applying update anyway");
                }
            }
            // Same status resubmitted: nothing to log.
            Ok(Some(_)) => {}
            // Row missing here still falls through; the update below decides.
            Ok(None) => {}
            Err(err) => {
                warn!(application_id = input.id, error = %err,
                    "could not read current status; skipping history");
            }
        }
    }

    let patch = ApplicationPatch {
        role_title: input.role_title,
        job_link,
        status: input.status,
        priority: input.priority,
        general_notes: input.general_notes,
    };
    let affected = db
        .update_application_fields(input.id, &input.user_id, &patch)
        .map_err(store_err)?;
    if affected == 0 {
        return Err(OpError::NotFound("Application not found".into()));
    }
    Ok(())
}

pub fn delete_application(db: &Database, application_id: i64, user_id: &str) -> Result<(), OpError> {
    let affected = db
        .delete_application(application_id, user_id)
        .map_err(store_err)?;
    if affected == 0 {
        return Err(OpError::NotFound(
            "Application not found or unauthorized".into(),
        ));
    }
    Ok(())
}

pub fn list_applications(
    db: &Database,
    user_id: &str,
    search: Option<&str>,
    page: u32,
    limit: u32,
) -> Result<(Vec<crate::models::Application>, i64), OpError> {
    if page == 0 {
        return Err(OpError::Validation("page must be at least 1".into()));
    }
    if limit == 0 {
        return Err(OpError::Validation("limit must be at least 1".into()));
    }
    db.list_applications(user_id, search, page, limit)
        .map_err(store_err)
}

pub fn get_application_detail(
    db: &Database,
    application_id: i64,
    user_id: &str,
) -> Result<ApplicationDetail, OpError> {
    let application = db
        .get_application(application_id, user_id)
        .map_err(store_err)?
        .ok_or_else(|| OpError::NotFound("Application not found".into()))?;
    let history = db
        .history_for_application(application_id)
        .map_err(store_err)?;
    let rounds = db
        .rounds_for_application(application_id)
        .map_err(store_err)?;
    Ok(ApplicationDetail {
        application,
        history,
        rounds,
    })
}

// --- Companies ---

#[derive(Debug, Clone)]
pub struct AddCompany {
    pub user_id: String,
    pub name: String,
    pub career_page_url: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

pub fn add_company(db: &Database, input: AddCompany) -> Result<i64, OpError> {
    require_nonempty(&input.user_id, "user_id")?;
    require_nonempty(&input.name, "Company name")?;
    let career_page_url = normalize_link(input.career_page_url, "Career page URL")?;

    if db
        .find_company_by_name(&input.user_id, &input.name)
        .map_err(store_err)?
        .is_some()
    {
        return Err(OpError::Validation(format!(
            "Company '{}' already exists",
            input.name
        )));
    }

    db.create_company(
        &input.user_id,
        &input.name,
        career_page_url.as_deref(),
        input.location.as_deref(),
        input.notes.as_deref(),
    )
    .map_err(store_err)
}

pub fn update_company(
    db: &Database,
    company_id: i64,
    user_id: &str,
    patch: CompanyPatch,
) -> Result<(), OpError> {
    if let Some(name) = &patch.name {
        require_nonempty(name, "Company name")?;
    }
    let patch = CompanyPatch {
        career_page_url: normalize_link(patch.career_page_url, "Career page URL")?,
        ..patch
    };
    let affected = db
        .update_company(company_id, user_id, &patch)
        .map_err(store_err)?;
    if affected == 0 {
        return Err(OpError::NotFound("Company not found or unauthorized".into()));
    }
    Ok(())
}

pub fn delete_company(db: &Database, company_id: i64, user_id: &str) -> Result<(), OpError> {
    let affected = db.delete_company(company_id, user_id).map_err(store_err)?;
    if affected == 0 {
        return Err(OpError::NotFound("Company not found or unauthorized".into()));
    }
    Ok(())
}

// --- Interview rounds ---

#[derive(Debug, Clone)]
pub struct AddRound {
    pub job_application_id: i64,
    pub user_id: String,
    pub round_number: i64,
    pub round_type: String,
    pub interview_date: Option<NaiveDate>,
    pub interviewer_name: Option<String>,
    pub meeting_link: Option<String>,
}

pub fn add_round(db: &Database, input: AddRound) -> Result<i64, OpError> {
    require_nonempty(&input.round_type, "Round type")?;
    if input.round_number < 1 {
        return Err(OpError::Validation("Round number must be positive".into()));
    }
    let meeting_link = normalize_link(input.meeting_link, "Meeting link")?;

    // Rounds have no user_id column; prove ownership through the parent
    // application before inserting.
    db.get_application(input.job_application_id, &input.user_id)
        .map_err(store_err)?
        .ok_or_else(|| OpError::NotFound("Application not found or unauthorized".into()))?;

    db.insert_round(
        input.job_application_id,
        input.round_number,
        &input.round_type,
        input.interview_date.map(|d| d.to_string()).as_deref(),
        input.interviewer_name.as_deref(),
        meeting_link.as_deref(),
    )
    .map_err(store_err)
}

#[derive(Debug, Clone)]
pub struct UpdateRound {
    pub round_id: i64,
    pub user_id: String,
    pub result: RoundResult,
    pub interview_date: Option<NaiveDate>,
    pub interviewer_name: Option<String>,
    pub meeting_link: Option<String>,
    pub questions_asked: Option<String>,
    pub feedback_received: Option<String>,
    pub personal_notes: Option<String>,
}

pub fn update_round(db: &Database, input: UpdateRound) -> Result<(), OpError> {
    let meeting_link = normalize_link(input.meeting_link, "Meeting link")?;
    let patch = RoundPatch {
        result: Some(input.result),
        interview_date: input.interview_date.map(|d| d.to_string()),
        interviewer_name: input.interviewer_name,
        meeting_link,
        questions_asked: input.questions_asked,
        feedback_received: input.feedback_received,
        personal_notes: input.personal_notes,
    };
    let affected = db
        .update_round(input.round_id, &input.user_id, &patch)
        .map_err(store_err)?;
    if affected == 0 {
        return Err(OpError::NotFound("Round not found or unauthorized".into()));
    }
    Ok(())
}

pub fn delete_round(db: &Database, round_id: i64, user_id: &str) -> Result<(), OpError> {
    let affected = db.delete_round(round_id, user_id).map_err(store_err)?;
    if affected == 0 {
        return Err(OpError::NotFound("Round not found or unauthorized".into()));
    }
    Ok(())
}

// --- Aggregates ---

pub fn dashboard_stats(db: &Database, user_id: &str) -> Result<DashboardStats, OpError> {
    db.dashboard_stats(user_id).map_err(store_err)
}

pub fn analytics(
    db: &Database,
    user_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<AnalyticsData, OpError> {
    if start > end {
        return Err(OpError::Validation(
            "start date must not be after end date".into(),
        ));
    }
    let daily_trend = db.daily_trend(user_id, start, end).map_err(store_err)?;
    let status_distribution = db.status_distribution(user_id).map_err(store_err)?;
    Ok(AnalyticsData {
        daily_trend,
        status_distribution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("in-memory database")
    }

    fn add_basic(db: &Database, user: &str, company: &str, title: &str) -> i64 {
        add_application(db, AddApplication::new(user, company, title)).expect("add application")
    }

    #[test]
    fn creation_seeds_exactly_one_history_entry() {
        let db = test_db();
        let id = add_application(
            &db,
            AddApplication {
                status: Status::Applied,
                ..AddApplication::new("u1", "Acme", "Engineer")
            },
        )
        .unwrap();

        let detail = get_application_detail(&db, id, "u1").unwrap();
        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.history[0].previous_status, None);
        assert_eq!(detail.history[0].new_status, Status::Applied);
        assert_eq!(
            detail.history[0].notes.as_deref(),
            Some("Initial application created")
        );
        assert_eq!(detail.application.status, Status::Applied);
        assert_eq!(detail.application.priority, Some(Priority::Medium));
    }

    #[test]
    fn status_change_appends_one_transition_entry() {
        let db = test_db();
        let id = add_basic(&db, "u1", "Acme", "Engineer");

        update_application(&db, UpdateApplication::status_only(id, "u1", Status::Interviewing))
            .unwrap();

        let detail = get_application_detail(&db, id, "u1").unwrap();
        assert_eq!(detail.application.status, Status::Interviewing);
        assert_eq!(detail.history.len(), 2);
        let last = detail.history.last().unwrap();
        assert_eq!(last.previous_status, Some(Status::Applied));
        assert_eq!(last.new_status, Status::Interviewing);
        assert_eq!(last.notes.as_deref(), Some("Status updated"));
    }

    #[test]
    fn every_distinct_status_pair_is_logged() {
        let all = [
            Status::Applied,
            Status::Shortlisted,
            Status::Interviewing,
            Status::Offer,
            Status::Rejected,
            Status::Withdrawn,
        ];
        for prev in all {
            for new in all {
                if prev == new {
                    continue;
                }
                let db = test_db();
                let id = add_application(
                    &db,
                    AddApplication {
                        status: prev,
                        ..AddApplication::new("u1", "Acme", "Engineer")
                    },
                )
                .unwrap();

                update_application(&db, UpdateApplication::status_only(id, "u1", new)).unwrap();

                let history = get_application_detail(&db, id, "u1").unwrap().history;
                assert_eq!(history.len(), 2, "{prev:?} -> {new:?}");
                assert_eq!(history[1].previous_status, Some(prev));
                assert_eq!(history[1].new_status, new);
            }
        }
    }

    #[test]
    fn self_transition_is_not_logged() {
        let db = test_db();
        let id = add_basic(&db, "u1", "Acme", "Engineer");
        update_application(
            &db,
            UpdateApplication {
                general_notes: Some("pinged recruiter".into()),
                ..UpdateApplication::status_only(id, "u1", Status::Applied)
            },
        )
        .unwrap();

        let detail = get_application_detail(&db, id, "u1").unwrap();
        assert_eq!(detail.history.len(), 1, "resubmitting the same status logs nothing");
        assert_eq!(detail.application.status, Status::Applied);
        assert_eq!(detail.application.general_notes.as_deref(), Some("pinged recruiter"));
        // Fields omitted from the payload stayed put.
        assert_eq!(detail.application.role_title, "Engineer");
    }

    #[test]
    fn update_without_status_skips_history_entirely() {
        let db = test_db();
        let id = add_basic(&db, "u1", "Acme", "Engineer");
        update_application(
            &db,
            UpdateApplication {
                id,
                user_id: "u1".into(),
                role_title: Some("Platform Engineer".into()),
                job_link: None,
                status: None,
                priority: None,
                general_notes: None,
            },
        )
        .unwrap();

        let detail = get_application_detail(&db, id, "u1").unwrap();
        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.application.role_title, "Platform Engineer");
        assert_eq!(detail.application.status, Status::Applied);
    }

    #[test]
    fn history_failure_never_blocks_the_update() {
        let db = test_db();
        let id = add_basic(&db, "u1", "Acme", "Engineer");

        // Every history insert from here on fails at the store.
        db.break_history_table().unwrap();

        update_application(&db, UpdateApplication::status_only(id, "u1", Status::Offer))
            .expect("primary update must survive the audit failure");

        let status = db.read_current_status(id, "u1").unwrap();
        assert_eq!(status, Some(Status::Offer));
    }

    #[test]
    fn unauthorized_update_is_not_found_not_store_error() {
        let db = test_db();
        let id = add_basic(&db, "u1", "Acme", "Engineer");

        let err = update_application(&db, UpdateApplication::status_only(id, "intruder", Status::Offer))
            .unwrap_err();
        assert!(matches!(err, OpError::NotFound(_)), "got {err:?}");

        let err = delete_application(&db, id, "intruder").unwrap_err();
        assert!(matches!(err, OpError::NotFound(_)), "got {err:?}");

        // No history entry and no visible change leaked from the attempts.
        let detail = get_application_detail(&db, id, "u1").unwrap();
        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.application.status, Status::Applied);
    }

    #[test]
    fn validation_rejects_before_touching_the_store() {
        let db = test_db();
        let err = add_application(&db, AddApplication::new("u1", "  ", "Engineer")).unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));

        let err = add_application(&db, AddApplication::new("u1", "Acme", "")).unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));

        let err = add_application(
            &db,
            AddApplication {
                job_link: Some("not a url".into()),
                ..AddApplication::new("u1", "Acme", "Engineer")
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));

        // Nothing was created along the way.
        let (items, total) = list_applications(&db, "u1", None, 1, 10).unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn empty_job_link_is_stored_as_absent() {
        let db = test_db();
        let id = add_application(
            &db,
            AddApplication {
                job_link: Some(String::new()),
                ..AddApplication::new("u1", "Acme", "Engineer")
            },
        )
        .unwrap();
        let detail = get_application_detail(&db, id, "u1").unwrap();
        assert_eq!(detail.application.job_link, None);
    }

    #[test]
    fn company_add_rejects_duplicates_per_user() {
        let db = test_db();
        let input = AddCompany {
            user_id: "u1".into(),
            name: "Acme".into(),
            career_page_url: Some("https://acme.example/careers".into()),
            location: Some("Berlin".into()),
            notes: None,
        };
        add_company(&db, input.clone()).unwrap();
        let err = add_company(&db, input.clone()).unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));

        // A different user may register the same name.
        add_company(
            &db,
            AddCompany {
                user_id: "u2".into(),
                ..input
            },
        )
        .unwrap();
    }

    #[test]
    fn round_lifecycle_is_owner_scoped() {
        let db = test_db();
        let app_id = add_basic(&db, "u1", "Acme", "Engineer");

        let err = add_round(
            &db,
            AddRound {
                job_application_id: app_id,
                user_id: "intruder".into(),
                round_number: 1,
                round_type: "Phone screen".into(),
                interview_date: None,
                interviewer_name: None,
                meeting_link: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::NotFound(_)));

        let round_id = add_round(
            &db,
            AddRound {
                job_application_id: app_id,
                user_id: "u1".into(),
                round_number: 1,
                round_type: "Phone screen".into(),
                interview_date: NaiveDate::from_ymd_opt(2025, 6, 2),
                interviewer_name: Some("Dana".into()),
                meeting_link: Some("https://meet.example/abc".into()),
            },
        )
        .unwrap();

        update_round(
            &db,
            UpdateRound {
                round_id,
                user_id: "u1".into(),
                result: RoundResult::Passed,
                interview_date: None,
                interviewer_name: None,
                meeting_link: None,
                questions_asked: Some("systems design".into()),
                feedback_received: None,
                personal_notes: None,
            },
        )
        .unwrap();

        let detail = get_application_detail(&db, app_id, "u1").unwrap();
        assert_eq!(detail.rounds.len(), 1);
        assert_eq!(detail.rounds[0].result, RoundResult::Passed);
        assert_eq!(detail.rounds[0].interview_date.as_deref(), Some("2025-06-02"));
        assert_eq!(detail.rounds[0].questions_asked.as_deref(), Some("systems design"));
        // Round edits never touch the application's audit trail.
        assert_eq!(detail.history.len(), 1);

        let err = delete_round(&db, round_id, "intruder").unwrap_err();
        assert!(matches!(err, OpError::NotFound(_)));
        delete_round(&db, round_id, "u1").unwrap();
    }

    #[test]
    fn round_validation() {
        let db = test_db();
        let app_id = add_basic(&db, "u1", "Acme", "Engineer");
        let base = AddRound {
            job_application_id: app_id,
            user_id: "u1".into(),
            round_number: 1,
            round_type: "Onsite".into(),
            interview_date: None,
            interviewer_name: None,
            meeting_link: None,
        };

        let err = add_round(
            &db,
            AddRound {
                round_number: 0,
                ..base.clone()
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));

        let err = add_round(
            &db,
            AddRound {
                round_type: String::new(),
                ..base.clone()
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));

        let err = add_round(
            &db,
            AddRound {
                meeting_link: Some("nope".into()),
                ..base
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
    }

    #[test]
    fn detail_for_missing_application_is_not_found() {
        let db = test_db();
        let err = get_application_detail(&db, 9999, "u1").unwrap_err();
        assert!(matches!(err, OpError::NotFound(_)));
    }

    #[test]
    fn analytics_combines_trend_and_distribution() {
        let db = test_db();
        let a = add_basic(&db, "u1", "Acme", "Engineer");
        add_basic(&db, "u1", "Globex", "Analyst");
        update_application(&db, UpdateApplication::status_only(a, "u1", Status::Offer)).unwrap();

        let today = chrono::Utc::now().date_naive();
        let start = today.pred_opt().unwrap();
        let data = analytics(&db, "u1", start, today).unwrap();

        assert_eq!(data.daily_trend.len(), 2);
        assert_eq!(data.daily_trend[1].count, 2);
        let offers = data
            .status_distribution
            .iter()
            .find(|s| s.status == Status::Offer)
            .map(|s| s.count);
        assert_eq!(offers, Some(1));

        let err = analytics(&db, "u1", today, start).unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
    }
}
