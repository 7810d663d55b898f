use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use problembank_common::Config;
use problembank_pipeline::{ListClustersQuery, ProblemBank, SimilarityRequest};
use problembank_store::PgProblemStore;

#[derive(Parser)]
#[command(name = "problembank", about = "Problem bank pipeline jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Extract a problem from an innovation cycle
    Extract { cycle_id: Uuid },
    /// Compute similarity edges
    Similarities {
        /// Score only this problem against the rest
        #[arg(long)]
        problem_id: Option<Uuid>,
        /// Minimum score to store an edge (defaults to SIMILARITY_THRESHOLD)
        #[arg(long)]
        threshold: Option<f64>,
        /// Score every pair, then rebuild theme clusters
        #[arg(long)]
        recompute_all: bool,
    },
    /// Inspect and manage clusters
    Clusters {
        #[command(subcommand)]
        command: ClusterCommand,
    },
}

#[derive(Subcommand)]
enum ClusterCommand {
    /// List active clusters
    List {
        #[arg(long)]
        theme: Option<String>,
    },
    /// Archive a cluster
    Archive { id: Uuid },
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("problembank=info"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgProblemStore::new(pool));

    if let Command::Migrate = cli.command {
        store.migrate().await?;
        info!("Migrations applied");
        return Ok(());
    }

    let bank = ProblemBank::new(store.clone(), store);

    match cli.command {
        Command::Migrate => {}
        Command::Extract { cycle_id } => {
            let outcome = bank.extract(cycle_id).await?;
            print_json(&outcome)?;
        }
        Command::Similarities {
            problem_id,
            threshold,
            recompute_all,
        } => {
            let request = SimilarityRequest {
                problem_id,
                threshold: threshold.unwrap_or(config.similarity_threshold),
                recompute_all,
            };
            let report = bank.compute_similarities(&request).await?;
            print_json(&report)?;
        }
        Command::Clusters { command } => match command {
            ClusterCommand::List { theme } => {
                let listings = bank
                    .list_clusters(&ListClustersQuery {
                        theme,
                        ..Default::default()
                    })
                    .await?;
                print_json(&listings)?;
            }
            ClusterCommand::Archive { id } => {
                let cluster = bank.archive_cluster(id).await?;
                print_json(&cluster)?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_similarity_flags() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "problembank",
            "similarities",
            "--problem-id",
            &id.to_string(),
            "--threshold",
            "0.5",
        ])
        .unwrap();
        match cli.command {
            Command::Similarities {
                problem_id,
                threshold,
                recompute_all,
            } => {
                assert_eq!(problem_id, Some(id));
                assert_eq!(threshold, Some(0.5));
                assert!(!recompute_all);
            }
            _ => panic!("expected similarities"),
        }
    }

    #[test]
    fn parses_nested_cluster_commands() {
        let cli = Cli::try_parse_from(["problembank", "clusters", "list", "--theme", "education"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Clusters {
                command: ClusterCommand::List { theme: Some(ref t) }
            } if t == "education"
        ));
    }

    #[test]
    fn rejects_malformed_cycle_id() {
        assert!(Cli::try_parse_from(["problembank", "extract", "not-a-uuid"]).is_err());
    }
}
