mod db;
mod models;
mod ops;

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use db::{CompanyPatch, Database};
use models::{Priority, RoundResult, Status};

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Track job applications, interview rounds, and status history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Add a job application
    Add {
        /// Owner user id
        #[arg(short, long)]
        user: String,

        /// Company name (found or created per user)
        company: String,

        /// Role title
        role: String,

        /// Link to the job posting
        #[arg(long)]
        link: Option<String>,

        /// Where the posting was found (linkedin, referral, ...)
        #[arg(long)]
        source: Option<String>,

        /// Priority (high, medium, low)
        #[arg(long, default_value = "medium", value_parser = parse_priority)]
        priority: Priority,

        /// Initial status (applied, shortlisted, interviewing, offer, rejected, withdrawn)
        #[arg(long, default_value = "applied", value_parser = parse_status)]
        status: Status,

        /// Free-text notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List applications
    List {
        /// Owner user id
        #[arg(short, long)]
        user: String,

        /// Substring match on company name or role title
        #[arg(short, long)]
        search: Option<String>,

        /// Page (1-based)
        #[arg(long, default_value = "1")]
        page: u32,

        /// Page size
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one application with its history and interview rounds
    Show {
        /// Owner user id
        #[arg(short, long)]
        user: String,

        /// Application ID
        id: i64,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Update fields of an application; omitted fields keep their values
    Update {
        /// Owner user id
        #[arg(short, long)]
        user: String,

        /// Application ID
        id: i64,

        /// New role title
        #[arg(long)]
        role: Option<String>,

        /// New job link
        #[arg(long)]
        link: Option<String>,

        /// New status; a change is recorded in the history ledger
        #[arg(long, value_parser = parse_status)]
        status: Option<Status>,

        /// New priority
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,

        /// New notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete an application (cascades to rounds and history)
    Delete {
        /// Owner user id
        #[arg(short, long)]
        user: String,

        /// Application ID
        id: i64,
    },

    /// Manage companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Manage interview rounds
    Round {
        #[command(subcommand)]
        command: RoundCommands,
    },

    /// Dashboard counters
    Stats {
        /// Owner user id
        #[arg(short, long)]
        user: String,
    },

    /// Application trend and status distribution
    Analytics {
        /// Owner user id
        #[arg(short, long)]
        user: String,

        /// Number of trailing days to chart
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// Add a company
    Add {
        #[arg(short, long)]
        user: String,

        name: String,

        #[arg(long)]
        careers: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// List companies
    List {
        #[arg(short, long)]
        user: String,
    },

    /// Update a company; omitted fields keep their values
    Update {
        #[arg(short, long)]
        user: String,

        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        careers: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a company
    Delete {
        #[arg(short, long)]
        user: String,

        id: i64,
    },
}

#[derive(Subcommand)]
enum RoundCommands {
    /// Add an interview round to an application
    Add {
        #[arg(short, long)]
        user: String,

        /// Application ID
        application: i64,

        /// Round number (1-based)
        number: i64,

        /// Round type (phone screen, onsite, ...)
        kind: String,

        /// Interview date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        interviewer: Option<String>,

        #[arg(long)]
        link: Option<String>,
    },

    /// Record a round's result and feedback
    Update {
        #[arg(short, long)]
        user: String,

        /// Round ID
        id: i64,

        /// Result (passed, failed, pending, skipped)
        #[arg(long, value_parser = parse_round_result)]
        result: RoundResult,

        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        interviewer: Option<String>,

        #[arg(long)]
        link: Option<String>,

        #[arg(long)]
        questions: Option<String>,

        #[arg(long)]
        feedback: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a round
    Delete {
        #[arg(short, long)]
        user: String,

        id: i64,
    },
}

fn parse_status(s: &str) -> Result<Status, String> {
    Status::parse(&s.to_uppercase()).ok_or_else(|| {
        format!("invalid status '{s}' (applied, shortlisted, interviewing, offer, rejected, withdrawn)")
    })
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::parse(&s.to_uppercase())
        .ok_or_else(|| format!("invalid priority '{s}' (high, medium, low)"))
}

fn parse_round_result(s: &str) -> Result<RoundResult, String> {
    RoundResult::parse(&s.to_uppercase())
        .ok_or_else(|| format!("invalid result '{s}' (passed, failed, pending, skipped)"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = Database::open()?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Add {
            user,
            company,
            role,
            link,
            source,
            priority,
            status,
            notes,
        } => {
            db.ensure_initialized()?;
            let id = ops::add_application(
                &db,
                ops::AddApplication {
                    user_id: user,
                    company_name: company,
                    role_title: role,
                    job_link: link,
                    source,
                    priority,
                    status,
                    general_notes: notes,
                },
            )?;
            println!("Added application #{}", id);
        }

        Commands::List {
            user,
            search,
            page,
            limit,
            json,
        } => {
            db.ensure_initialized()?;
            let (items, total) =
                ops::list_applications(&db, &user, search.as_deref(), page, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<13} {:<25} {:<20} {:<8} {:<12}",
                    "ID", "STATUS", "ROLE", "COMPANY", "PRIORITY", "APPLIED"
                );
                println!("{}", "-".repeat(88));
                for app in &items {
                    println!(
                        "{:<6} {:<13} {:<25} {:<20} {:<8} {:<12}",
                        app.id,
                        app.status.as_str(),
                        truncate(&app.role_title, 23),
                        truncate(&app.company_name, 18),
                        app.priority.map(|p| p.as_str()).unwrap_or("-"),
                        app.applied_date,
                    );
                }
                println!(
                    "\nPage {} ({} of {} total)",
                    page,
                    items.len(),
                    total
                );
            }
        }

        Commands::Show { user, id, json } => {
            db.ensure_initialized()?;
            let detail = ops::get_application_detail(&db, id, &user)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                let app = &detail.application;
                println!("Application #{}", app.id);
                println!("Role: {}", app.role_title);
                println!("Company: {}", app.company_name);
                if let Some(location) = &app.company_location {
                    println!("Location: {}", location);
                }
                println!("Status: {}", app.status.as_str());
                if let Some(priority) = app.priority {
                    println!("Priority: {}", priority.as_str());
                }
                if let Some(link) = &app.job_link {
                    println!("Link: {}", link);
                }
                if let Some(source) = &app.source {
                    println!("Source: {}", source);
                }
                println!("Applied: {}", app.applied_date);
                if let Some(notes) = &app.general_notes {
                    println!("Notes: {}", notes);
                }

                if !detail.rounds.is_empty() {
                    println!("\nInterview rounds:");
                    for round in &detail.rounds {
                        println!(
                            "  #{} round {} - {} [{}]{}",
                            round.id,
                            round.round_number,
                            round.round_type,
                            round.result.as_str(),
                            round
                                .interview_date
                                .as_deref()
                                .map(|d| format!(" on {d}"))
                                .unwrap_or_default(),
                        );
                        if let Some(feedback) = &round.feedback_received {
                            println!("     feedback: {}", feedback);
                        }
                    }
                }

                println!("\nHistory:");
                for entry in &detail.history {
                    let from = entry
                        .previous_status
                        .map(|s| s.as_str())
                        .unwrap_or("(created)");
                    println!(
                        "  {} {} -> {}{}",
                        entry.changed_at,
                        from,
                        entry.new_status.as_str(),
                        entry
                            .notes
                            .as_deref()
                            .map(|n| format!(" ({n})"))
                            .unwrap_or_default(),
                    );
                }
            }
        }

        Commands::Update {
            user,
            id,
            role,
            link,
            status,
            priority,
            notes,
        } => {
            db.ensure_initialized()?;
            ops::update_application(
                &db,
                ops::UpdateApplication {
                    id,
                    user_id: user,
                    role_title: role,
                    job_link: link,
                    status,
                    priority,
                    general_notes: notes,
                },
            )?;
            println!("Updated application #{}", id);
        }

        Commands::Delete { user, id } => {
            db.ensure_initialized()?;
            ops::delete_application(&db, id, &user)?;
            println!("Deleted application #{}", id);
        }

        Commands::Company { command } => {
            db.ensure_initialized()?;
            match command {
                CompanyCommands::Add {
                    user,
                    name,
                    careers,
                    location,
                    notes,
                } => {
                    let id = ops::add_company(
                        &db,
                        ops::AddCompany {
                            user_id: user,
                            name: name.clone(),
                            career_page_url: careers,
                            location,
                            notes,
                        },
                    )?;
                    println!("Added company '{}' (ID: {})", name, id);
                }

                CompanyCommands::List { user } => {
                    let companies = db.list_companies(&user)?;
                    if companies.is_empty() {
                        println!("No companies found.");
                    } else {
                        println!("{:<6} {:<25} {:<20} {:<30}", "ID", "NAME", "LOCATION", "CAREERS");
                        println!("{}", "-".repeat(83));
                        for company in companies {
                            println!(
                                "{:<6} {:<25} {:<20} {:<30}",
                                company.id,
                                truncate(&company.name, 23),
                                truncate(&company.location.unwrap_or_default(), 18),
                                truncate(&company.career_page_url.unwrap_or_default(), 28),
                            );
                        }
                    }
                }

                CompanyCommands::Update {
                    user,
                    id,
                    name,
                    careers,
                    location,
                    notes,
                } => {
                    ops::update_company(
                        &db,
                        id,
                        &user,
                        CompanyPatch {
                            name,
                            career_page_url: careers,
                            location,
                            notes,
                        },
                    )?;
                    println!("Updated company #{}", id);
                }

                CompanyCommands::Delete { user, id } => {
                    ops::delete_company(&db, id, &user)?;
                    println!("Deleted company #{}", id);
                }
            }
        }

        Commands::Round { command } => {
            db.ensure_initialized()?;
            match command {
                RoundCommands::Add {
                    user,
                    application,
                    number,
                    kind,
                    date,
                    interviewer,
                    link,
                } => {
                    let id = ops::add_round(
                        &db,
                        ops::AddRound {
                            job_application_id: application,
                            user_id: user,
                            round_number: number,
                            round_type: kind,
                            interview_date: date,
                            interviewer_name: interviewer,
                            meeting_link: link,
                        },
                    )?;
                    println!("Added round #{} to application #{}", id, application);
                }

                RoundCommands::Update {
                    user,
                    id,
                    result,
                    date,
                    interviewer,
                    link,
                    questions,
                    feedback,
                    notes,
                } => {
                    ops::update_round(
                        &db,
                        ops::UpdateRound {
                            round_id: id,
                            user_id: user,
                            result,
                            interview_date: date,
                            interviewer_name: interviewer,
                            meeting_link: link,
                            questions_asked: questions,
                            feedback_received: feedback,
                            personal_notes: notes,
                        },
                    )?;
                    println!("Updated round #{}", id);
                }

                RoundCommands::Delete { user, id } => {
                    ops::delete_round(&db, id, &user)?;
                    println!("Deleted round #{}", id);
                }
            }
        }

        Commands::Stats { user } => {
            db.ensure_initialized()?;
            let stats = ops::dashboard_stats(&db, &user)?;
            println!("Applications: {}", stats.total_applications);
            println!("Interviewing: {}", stats.active_interviews);
            println!("Offers:       {}", stats.offers);
            println!("Rejections:   {}", stats.rejections);
        }

        Commands::Analytics { user, days } => {
            db.ensure_initialized()?;
            let end = Utc::now().date_naive();
            let start = end - Duration::days(i64::from(days.saturating_sub(1)));
            let data = ops::analytics(&db, &user, start, end)?;

            println!("Applications per day ({} to {}):", start, end);
            for day in &data.daily_trend {
                if day.count > 0 {
                    println!("  {}  {}", day.date, "#".repeat(day.count as usize));
                }
            }

            println!("\nStatus distribution:");
            for entry in &data.status_distribution {
                println!("  {:<13} {}", entry.status.as_str(), entry.count);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
