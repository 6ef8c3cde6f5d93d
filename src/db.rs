use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;

use crate::models::{
    Application, Company, DailyCount, DashboardStats, HistoryEntry, InterviewRound, Priority,
    RoundResult, Status, StatusCount,
};

/// Fields of an application update; `None` leaves the stored column unchanged.
#[derive(Debug, Clone, Default)]
pub struct ApplicationPatch {
    pub role_title: Option<String>,
    pub job_link: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub general_notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompanyPatch {
    pub name: Option<String>,
    pub career_page_url: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoundPatch {
    pub result: Option<RoundResult>,
    pub interview_date: Option<String>,
    pub interviewer_name: Option<String>,
    pub meeting_link: Option<String>,
    pub questions_asked: Option<String>,
    pub feedback_received: Option<String>,
    pub personal_notes: Option<String>,
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, path })
    }

    /// In-memory database with the schema applied; used by the test suites.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrack") {
            Ok(proj_dirs.data_dir().join("jobtrack.db"))
        } else {
            Ok(PathBuf::from("jobtrack.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                career_page_url TEXT,
                location TEXT,
                notes TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                role_title TEXT NOT NULL,
                job_link TEXT,
                source TEXT,
                status TEXT NOT NULL DEFAULT 'APPLIED'
                    CHECK (status IN ('APPLIED', 'SHORTLISTED', 'INTERVIEWING', 'OFFER', 'REJECTED', 'WITHDRAWN')),
                priority TEXT CHECK (priority IN ('HIGH', 'MEDIUM', 'LOW')),
                general_notes TEXT,
                applied_date TEXT NOT NULL DEFAULT (date('now')),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS application_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                previous_status TEXT,
                new_status TEXT NOT NULL,
                notes TEXT,
                changed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS interview_rounds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                round_number INTEGER NOT NULL,
                round_type TEXT NOT NULL,
                interview_date TEXT,
                interviewer_name TEXT,
                meeting_link TEXT,
                result TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (result IN ('PASSED', 'FAILED', 'PENDING', 'SKIPPED')),
                questions_asked TEXT,
                feedback_received TEXT,
                personal_notes TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_companies_user ON companies(user_id);
            CREATE INDEX IF NOT EXISTS idx_applications_user ON applications(user_id);
            CREATE INDEX IF NOT EXISTS idx_applications_company ON applications(company_id);
            CREATE INDEX IF NOT EXISTS idx_history_application ON application_history(job_application_id);
            CREATE INDEX IF NOT EXISTS idx_rounds_application ON interview_rounds(job_application_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobtrack init' first."));
        }
        Ok(())
    }

    // --- Company operations ---

    pub fn find_company_by_name(&self, user_id: &str, name: &str) -> Result<Option<Company>> {
        self.conn
            .query_row(
                "SELECT id, user_id, name, career_page_url, location, notes, created_at, updated_at
                 FROM companies WHERE user_id = ?1 AND LOWER(name) = LOWER(?2)",
                params![user_id, name],
                Self::row_to_company,
            )
            .optional()
            .context("Failed to look up company")
    }

    pub fn create_company(
        &self,
        user_id: &str,
        name: &str,
        career_page_url: Option<&str>,
        location: Option<&str>,
        notes: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO companies (user_id, name, career_page_url, location, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, name, career_page_url, location, notes],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_or_create_company(&self, user_id: &str, name: &str) -> Result<i64> {
        if let Some(company) = self.find_company_by_name(user_id, name)? {
            return Ok(company.id);
        }
        self.create_company(user_id, name, None, None, None)
    }

    pub fn list_companies(&self, user_id: &str) -> Result<Vec<Company>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, career_page_url, location, notes, created_at, updated_at
             FROM companies WHERE user_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map([user_id], Self::row_to_company)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list companies")
    }

    pub fn update_company(&self, company_id: i64, user_id: &str, patch: &CompanyPatch) -> Result<usize> {
        let affected = self.conn.execute(
            "UPDATE companies
             SET name = COALESCE(?3, name),
                 career_page_url = COALESCE(?4, career_page_url),
                 location = COALESCE(?5, location),
                 notes = COALESCE(?6, notes),
                 updated_at = datetime('now')
             WHERE id = ?1 AND user_id = ?2",
            params![
                company_id,
                user_id,
                patch.name,
                patch.career_page_url,
                patch.location,
                patch.notes
            ],
        )?;
        Ok(affected)
    }

    pub fn delete_company(&self, company_id: i64, user_id: &str) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM companies WHERE id = ?1 AND user_id = ?2",
            params![company_id, user_id],
        )?;
        Ok(affected)
    }

    fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<Company> {
        Ok(Company {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            career_page_url: row.get(3)?,
            location: row.get(4)?,
            notes: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // --- Application operations ---

    #[allow(clippy::too_many_arguments)]
    pub fn insert_application(
        &self,
        user_id: &str,
        company_id: i64,
        role_title: &str,
        job_link: Option<&str>,
        source: Option<&str>,
        status: Status,
        priority: Option<Priority>,
        general_notes: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO applications (user_id, company_id, role_title, job_link, source, status, priority, general_notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                company_id,
                role_title,
                job_link,
                source,
                status,
                priority,
                general_notes
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_history_entry(
        &self,
        application_id: i64,
        previous_status: Option<Status>,
        new_status: Status,
        note: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO application_history (job_application_id, previous_status, new_status, notes)
             VALUES (?1, ?2, ?3, ?4)",
            params![application_id, previous_status, new_status, note],
        )?;
        Ok(())
    }

    pub fn read_current_status(&self, application_id: i64, user_id: &str) -> Result<Option<Status>> {
        self.conn
            .query_row(
                "SELECT status FROM applications WHERE id = ?1 AND user_id = ?2",
                params![application_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read current status")
    }

    /// COALESCE partial update: absent patch fields keep their stored values,
    /// so a single-field edit never blanks out the rest of the row.
    pub fn update_application_fields(
        &self,
        application_id: i64,
        user_id: &str,
        patch: &ApplicationPatch,
    ) -> Result<usize> {
        let affected = self.conn.execute(
            "UPDATE applications
             SET role_title = COALESCE(?3, role_title),
                 job_link = COALESCE(?4, job_link),
                 status = COALESCE(?5, status),
                 priority = COALESCE(?6, priority),
                 general_notes = COALESCE(?7, general_notes),
                 updated_at = datetime('now')
             WHERE id = ?1 AND user_id = ?2",
            params![
                application_id,
                user_id,
                patch.role_title,
                patch.job_link,
                patch.status,
                patch.priority,
                patch.general_notes
            ],
        )?;
        Ok(affected)
    }

    pub fn delete_application(&self, application_id: i64, user_id: &str) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM applications WHERE id = ?1 AND user_id = ?2",
            params![application_id, user_id],
        )?;
        Ok(affected)
    }

    const APPLICATION_COLUMNS: &'static str = "
        a.id, a.user_id, a.company_id, c.name, c.location, a.role_title,
        a.job_link, a.source, a.status, a.priority, a.general_notes,
        a.applied_date, a.created_at, a.updated_at";

    pub fn get_application(&self, application_id: i64, user_id: &str) -> Result<Option<Application>> {
        let sql = format!(
            "SELECT {} FROM applications a
             JOIN companies c ON a.company_id = c.id
             WHERE a.id = ?1 AND a.user_id = ?2",
            Self::APPLICATION_COLUMNS
        );
        self.conn
            .query_row(&sql, params![application_id, user_id], Self::row_to_application)
            .optional()
            .context("Failed to load application")
    }

    /// Case-insensitive substring search over company name and role title,
    /// newest-updated first, with a parallel total count for pagination.
    pub fn list_applications(
        &self,
        user_id: &str,
        search: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Application>, i64)> {
        let offset = (page.saturating_sub(1)) * limit;

        let mut where_clause = String::from("a.user_id = ?1");
        let needle = search.map(|s| format!("%{}%", s.to_lowercase()));
        if needle.is_some() {
            where_clause.push_str(
                " AND (LOWER(c.name) LIKE ?2 OR LOWER(a.role_title) LIKE ?2)",
            );
        }

        let data_sql = format!(
            "SELECT {} FROM applications a
             JOIN companies c ON a.company_id = c.id
             WHERE {}
             ORDER BY a.updated_at DESC, a.id DESC
             LIMIT ?{} OFFSET ?{}",
            Self::APPLICATION_COLUMNS,
            where_clause,
            if needle.is_some() { 3 } else { 2 },
            if needle.is_some() { 4 } else { 3 },
        );
        let count_sql = format!(
            "SELECT COUNT(*) FROM applications a
             JOIN companies c ON a.company_id = c.id
             WHERE {}",
            where_clause
        );

        let mut stmt = self.conn.prepare(&data_sql)?;
        let (items, total) = if let Some(needle) = &needle {
            let rows = stmt.query_map(
                params![user_id, needle, limit, offset],
                Self::row_to_application,
            )?;
            let items = rows.collect::<Result<Vec<_>, _>>()?;
            let total: i64 =
                self.conn
                    .query_row(&count_sql, params![user_id, needle], |row| row.get(0))?;
            (items, total)
        } else {
            let rows = stmt.query_map(params![user_id, limit, offset], Self::row_to_application)?;
            let items = rows.collect::<Result<Vec<_>, _>>()?;
            let total: i64 = self
                .conn
                .query_row(&count_sql, params![user_id], |row| row.get(0))?;
            (items, total)
        };

        Ok((items, total))
    }

    pub fn history_for_application(&self, application_id: i64) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_application_id, previous_status, new_status, notes, changed_at
             FROM application_history
             WHERE job_application_id = ?1
             ORDER BY changed_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([application_id], |row| {
            Ok(HistoryEntry {
                id: row.get(0)?,
                job_application_id: row.get(1)?,
                previous_status: row.get(2)?,
                new_status: row.get(3)?,
                notes: row.get(4)?,
                changed_at: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load application history")
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            user_id: row.get(1)?,
            company_id: row.get(2)?,
            company_name: row.get(3)?,
            company_location: row.get(4)?,
            role_title: row.get(5)?,
            job_link: row.get(6)?,
            source: row.get(7)?,
            status: row.get(8)?,
            priority: row.get(9)?,
            general_notes: row.get(10)?,
            applied_date: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    // --- Interview round operations ---

    pub fn insert_round(
        &self,
        application_id: i64,
        round_number: i64,
        round_type: &str,
        interview_date: Option<&str>,
        interviewer_name: Option<&str>,
        meeting_link: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO interview_rounds
                 (job_application_id, round_number, round_type, interview_date, interviewer_name, meeting_link, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING')",
            params![
                application_id,
                round_number,
                round_type,
                interview_date,
                interviewer_name,
                meeting_link
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn rounds_for_application(&self, application_id: i64) -> Result<Vec<InterviewRound>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_application_id, round_number, round_type, interview_date,
                    interviewer_name, meeting_link, result, questions_asked,
                    feedback_received, personal_notes, created_at, updated_at
             FROM interview_rounds
             WHERE job_application_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([application_id], Self::row_to_round)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load interview rounds")
    }

    /// Round writes are scoped to the owner transitively, through the parent
    /// application's user_id.
    pub fn update_round(&self, round_id: i64, user_id: &str, patch: &RoundPatch) -> Result<usize> {
        let affected = self.conn.execute(
            "UPDATE interview_rounds
             SET result = COALESCE(?3, result),
                 interview_date = COALESCE(?4, interview_date),
                 interviewer_name = COALESCE(?5, interviewer_name),
                 meeting_link = COALESCE(?6, meeting_link),
                 questions_asked = COALESCE(?7, questions_asked),
                 feedback_received = COALESCE(?8, feedback_received),
                 personal_notes = COALESCE(?9, personal_notes),
                 updated_at = datetime('now')
             WHERE id = ?1
               AND job_application_id IN (SELECT id FROM applications WHERE user_id = ?2)",
            params![
                round_id,
                user_id,
                patch.result,
                patch.interview_date,
                patch.interviewer_name,
                patch.meeting_link,
                patch.questions_asked,
                patch.feedback_received,
                patch.personal_notes
            ],
        )?;
        Ok(affected)
    }

    pub fn delete_round(&self, round_id: i64, user_id: &str) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM interview_rounds
             WHERE id = ?1
               AND job_application_id IN (SELECT id FROM applications WHERE user_id = ?2)",
            params![round_id, user_id],
        )?;
        Ok(affected)
    }

    fn row_to_round(row: &rusqlite::Row) -> rusqlite::Result<InterviewRound> {
        Ok(InterviewRound {
            id: row.get(0)?,
            job_application_id: row.get(1)?,
            round_number: row.get(2)?,
            round_type: row.get(3)?,
            interview_date: row.get(4)?,
            interviewer_name: row.get(5)?,
            meeting_link: row.get(6)?,
            result: row.get(7)?,
            questions_asked: row.get(8)?,
            feedback_received: row.get(9)?,
            personal_notes: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    // --- Aggregates ---

    pub fn dashboard_stats(&self, user_id: &str) -> Result<DashboardStats> {
        self.conn
            .query_row(
                "SELECT COUNT(*),
                        SUM(CASE WHEN status = 'INTERVIEWING' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status = 'OFFER' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status = 'REJECTED' THEN 1 ELSE 0 END)
                 FROM applications WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(DashboardStats {
                        total_applications: row.get(0)?,
                        active_interviews: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        offers: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        rejections: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    })
                },
            )
            .context("Failed to load dashboard stats")
    }

    /// Per-day application counts between `start` and `end` inclusive, with
    /// zero-count days filled in so the trend line has no gaps.
    pub fn daily_trend(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT applied_date, COUNT(*)
             FROM applications
             WHERE user_id = ?1 AND applied_date >= ?2 AND applied_date <= ?3
             GROUP BY applied_date
             ORDER BY applied_date ASC",
        )?;
        let rows = stmt.query_map(
            params![user_id, start.to_string(), end.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let counted: Vec<(String, i64)> = rows.collect::<Result<Vec<_>, _>>()?;

        let mut trend = Vec::new();
        let mut day = start;
        while day <= end {
            let date = day.to_string();
            let count = counted
                .iter()
                .find(|(d, _)| *d == date)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            trend.push(DailyCount { date, count });
            day = day.succ_opt().context("Date range overflow")?;
        }
        Ok(trend)
    }

    pub fn status_distribution(&self, user_id: &str) -> Result<Vec<StatusCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM applications
             WHERE user_id = ?1 GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok(StatusCount {
                status: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load status distribution")
    }

    /// Test hook: makes every subsequent history insert fail without
    /// touching the applications table.
    #[cfg(test)]
    pub fn break_history_table(&self) -> Result<()> {
        self.conn.execute_batch("DROP TABLE application_history;")?;
        Ok(())
    }
}
