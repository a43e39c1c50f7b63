mod config;
mod error;
mod layers;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::layers::export::{ExportArtifact, ExportFormat};
use crate::layers::session::ResearchSession;
use crate::layers::ExpertiseLevel;

#[derive(Parser)]
#[command(name = "gap-finder", version, about = "Find research gaps in recent academic literature")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search Semantic Scholar and Crossref and list the ranked papers
    Search { text: String },
    /// Search, grade, analyze gaps and export the results
    Analyze {
        text: String,
        #[arg(short, long, value_enum)]
        format: Option<ExportFormat>,
        #[arg(short, long, default_value = "exports")]
        output: PathBuf,
        #[arg(short, long, value_enum)]
        expertise: Option<ExpertiseLevel>,
        /// Skip paper quality grading
        #[arg(long)]
        no_grades: bool,
    },
    /// Print the research topic found in a sentence
    Topic { text: String },
    /// Print the active configuration with masked keys
    Config,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// `exports/<topic>_<timestamp>` style directory name.
fn run_dir_name(topic: &str, at: DateTime<Utc>) -> String {
    let slug: String = topic
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.split('_').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("_");
    format!("{}_{}", slug, at.format("%Y%m%d_%H%M%S"))
}

fn write_artifact(artifact: &ExportArtifact, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    artifact
        .files()
        .into_iter()
        .map(|(name, bytes)| {
            let path = dir.join(name);
            std::fs::write(&path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
            Ok(path)
        })
        .collect()
}

async fn resolve_topic(session: &ResearchSession, text: &str) -> Result<String> {
    match session.resolve_topic(text).await {
        Some(topic) => Ok(topic),
        None => bail!("No research topic found in '{}'", text),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 0. Load Configuration
    let config = Config::from_env();
    init_tracing(&config.log_level);
    config.warn_on_malformed_keys();

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.summary())?);
        }
        Command::Topic { text } => {
            let session = ResearchSession::new(config)?;
            match session.resolve_topic(&text).await {
                Some(topic) => println!("{}", topic),
                None => println!("No research topic found."),
            }
        }
        Command::Search { text } => {
            let mut session = ResearchSession::new(config)?;
            let topic = resolve_topic(&session, &text).await?;

            println!("--- Searching: {} ---", topic);
            let papers = session.find_papers(&topic).await;
            if papers.is_empty() {
                println!("No recent papers found.");
            }
            for (i, paper) in papers.iter().enumerate() {
                println!("[{}] {} ({}) | {} | {} citations", i + 1, paper.title, paper.year, paper.venue, paper.citations);
            }
            for warning in session.warnings() {
                println!("Warning: {} unavailable ({})", warning.source, warning.message);
            }
        }
        Command::Analyze {
            text,
            format,
            output,
            expertise,
            no_grades,
        } => {
            let format = format.unwrap_or(config.default_export_format);
            let mut session = ResearchSession::new(config)?;
            session.set_expertise(expertise);
            let topic = resolve_topic(&session, &text).await?;

            // 1. Discovery
            println!("--- Step 1: Discovery ---");
            let found = session.find_papers(&topic).await.len();
            println!("Found {} recent papers on '{}'.", found, topic);
            for warning in session.warnings() {
                println!("Warning: {} unavailable ({})", warning.source, warning.message);
            }
            if found == 0 {
                return Ok(());
            }

            // 2. Grading
            if !no_grades {
                println!("\n--- Step 2: Grading ---");
                session.grade_papers();
                for paper in session.papers() {
                    if let Some(grade) = session.grades().get(&paper.id) {
                        println!("{:>2} {:>4.1}  {}", grade.overall_grade.as_str(), grade.overall_score, paper.title);
                    }
                }
            }

            // 3. Gap analysis
            println!("\n--- Step 3: Gap Analysis ---");
            let report = session.analyze_gaps().await;
            if let Some(error) = &report.error {
                println!("Gap analysis unavailable: {}", error.message);
            }
            for (i, gap) in session.prioritized_gaps().iter().enumerate() {
                println!(
                    "{}. [{}] {} (confidence {:.2}, novelty {:?}, impact {:?})",
                    i + 1,
                    gap.category,
                    gap.description,
                    gap.confidence(),
                    gap.novelty,
                    gap.impact
                );
            }

            // 4. Export
            println!("\n--- Step 4: Export ---");
            let exported_at = Utc::now();
            let artifact = session.export(format, exported_at)?;
            let dir = output.join(run_dir_name(&topic, exported_at));
            for path in write_artifact(&artifact, &dir)? {
                println!("Wrote {:?}", path);
            }
        }
    }

    Ok(())
}
