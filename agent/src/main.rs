use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dashboard;
mod error;
mod format;
mod llm;
mod runner;
mod session;
#[cfg(test)]
mod testing;
mod tools;

use analyst_engine::{shape_chat, validate};

use config::AgentConfig;
use dashboard::{DashboardBuilder, DashboardResult};
use llm::ChatClient;
use runner::Analyst;
use session::{Readiness, Session, EMPTY_DATA_MESSAGE};
use tools::{HttpToolHost, ToolHost};

#[derive(Parser)]
#[command(name = "analyst", about = "Ask natural-language questions about tabular data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question with a formatted text answer
    Ask { question: String },
    /// Generate an HTML dashboard for a question
    Dashboard {
        question: String,
        /// Where to write the rendered document
        #[arg(long, default_value = "dashboard.html")]
        out: PathBuf,
    },
    /// Run one SQL query directly against the tool host (no model)
    Query { sql: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analyst_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::from_env()?;
    let llm = ChatClient::new(&config);
    let host = HttpToolHost::new(&config);
    let mut session = Session::new();
    info!(session = %session.id(), "session started");

    match cli.command {
        Command::Ask { question } => {
            let analyst = Analyst::new(&llm, &host);
            let answer = analyst.answer(&mut session, &question).await?;
            println!("{}", answer);
        }
        Command::Dashboard { question, out } => {
            let builder = DashboardBuilder::new(&llm, &host);
            match builder.build(&mut session, &question).await? {
                DashboardResult::NoData => println!("{}", EMPTY_DATA_MESSAGE),
                DashboardResult::Ready(dashboard) => {
                    std::fs::write(&out, &dashboard.html)?;
                    println!(
                        "Dashboard with {} metrics written to {}",
                        dashboard.metrics.len(),
                        out.display()
                    );
                }
            }
        }
        Command::Query { sql } => {
            let (files, file_type, schema) = match session.prepare(&host).await? {
                Readiness::EmptyOnly => {
                    println!("{}", EMPTY_DATA_MESSAGE);
                    return Ok(());
                }
                Readiness::Ready {
                    files,
                    file_type,
                    schema,
                } => (files, file_type, schema),
            };
            if let Err(rejection) = validate(&sql, &schema) {
                println!("Query rejected: {}", rejection);
                return Ok(());
            }
            let records = host.execute_sql(&files, &sql, &file_type).await?;
            println!("{}", format::render_chat(&shape_chat(&records)));
        }
    }

    Ok(())
}
