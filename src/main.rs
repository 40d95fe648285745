use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rank_trends::config::EngineConfig;
use rank_trends::leaderboard::LeaderboardQuery;
use rank_trends::models::{NewResult, ResultPatch, Student};
use rank_trends::report;
use rank_trends::store::{PgStore, ResultFilter};
use rank_trends::Engine;

#[derive(Parser)]
#[command(name = "rank-trends")]
#[command(about = "Leaderboards, rank movement and score trends for student results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import results from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Register or update a student record
    AddStudent {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long = "class")]
        class_name: Option<String>,
    },
    /// Record one test result
    AddResult {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        test: String,
        #[arg(long)]
        marks: f64,
        #[arg(long)]
        grade: String,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Change fields of a recorded result
    UpdateResult {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        test: Option<String>,
        #[arg(long)]
        marks: Option<f64>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Remove a recorded result
    DeleteResult { id: Uuid },
    /// Change a student's display name everywhere
    RenameStudent {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        name: String,
    },
    /// Remove a student record (their results stay)
    DeleteStudent {
        #[arg(long)]
        student_id: String,
    },
    /// List recorded results, newest first
    Results {
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        test: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Print a ranked leaderboard as JSON
    Leaderboard {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        test: String,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Print a student's score series and trend as JSON
    Performance {
        student_id: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Print two students' series side by side as JSON
    Compare {
        #[arg(long)]
        student_a: String,
        #[arg(long)]
        student_b: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Write a markdown leaderboard report
    Report {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        test: String,
        /// Append performance sections for these students
        #[arg(long = "student")]
        students: Vec<String>,
        #[arg(long, default_value = "leaderboard.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PgStore::new(pool));

    if let Commands::InitDb = cli.command {
        store.migrate().await?;
        println!("Schema ready.");
        return Ok(());
    }

    let (engine, _failures) = Engine::new(store, config);
    let outcome = run(&engine, cli.command).await;
    // snapshot writes and invalidations must land before the process exits
    engine.tasks.flush().await;
    outcome
}

async fn run(engine: &Engine, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {}
        Commands::Import { csv } => {
            let inserted = engine.results.import_csv(&csv).await?;
            println!("Inserted {inserted} results from {}.", csv.display());
        }
        Commands::AddStudent {
            student_id,
            name,
            email,
            class_name,
        } => {
            engine
                .results
                .upsert_student(&Student {
                    student_id: student_id.clone(),
                    name,
                    email,
                    class_name,
                })
                .await?;
            println!("Student {student_id} saved.");
        }
        Commands::AddResult {
            student_id,
            name,
            subject,
            test,
            marks,
            grade,
            date,
        } => {
            let stored = engine
                .results
                .record_result(NewResult {
                    student_id,
                    name,
                    subject,
                    marks,
                    grade,
                    test_name: test,
                    date,
                })
                .await?;
            println!("Recorded result {}.", stored.id);
        }
        Commands::UpdateResult {
            id,
            name,
            subject,
            test,
            marks,
            grade,
            date,
        } => {
            let patch = ResultPatch {
                name,
                subject,
                marks,
                grade,
                test_name: test,
                date,
            };
            let updated = engine.results.update_result(id, &patch).await?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        Commands::DeleteResult { id } => {
            engine.results.delete_result(id).await?;
            println!("Deleted result {id}.");
        }
        Commands::RenameStudent { student_id, name } => {
            engine.results.rename_student(&student_id, &name).await?;
            println!("Renamed {student_id} to {name}.");
        }
        Commands::DeleteStudent { student_id } => {
            engine.results.delete_student(&student_id).await?;
            println!("Deleted student {student_id}; their results remain.");
        }
        Commands::Results {
            student_id,
            subject,
            test,
            from,
            to,
            page,
            limit,
        } => {
            let filter = ResultFilter {
                student_id,
                subject,
                test_name: test,
                from,
                to,
                ..ResultFilter::default()
            };
            let listing = engine.results.list_results(filter, page, limit).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Commands::Leaderboard {
            subject,
            test,
            page,
            limit,
        } => {
            let query = LeaderboardQuery {
                subject: Some(subject),
                test_name: Some(test),
                page,
                limit,
            };
            let board = engine.leaderboard.get_leaderboard(&query).await?;
            println!("{}", serde_json::to_string_pretty(&board)?);
        }
        Commands::Performance {
            student_id,
            subject,
        } => {
            let performance = engine
                .performance
                .get_performance(&student_id, subject.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&performance)?);
        }
        Commands::Compare {
            student_a,
            student_b,
            subject,
        } => {
            let comparison = engine
                .performance
                .compare_performance(&student_a, &student_b, subject.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        }
        Commands::Report {
            subject,
            test,
            students,
            out,
        } => {
            let board = engine
                .leaderboard
                .get_leaderboard(&LeaderboardQuery::new(&subject, &test))
                .await?;
            let mut report = report::build_leaderboard_report(&board);

            for student_id in &students {
                let performance = engine
                    .performance
                    .get_performance(student_id, Some(subject.as_str()))
                    .await?;
                report.push('\n');
                report.push_str(&report::build_performance_report(&performance));
            }

            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
