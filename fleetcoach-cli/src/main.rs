use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleetcoach_audit::{tail, verify_log};
use fleetcoach_core::{wiring, CoachConfig, CoachingOrchestrator};
use fleetcoach_geo::{cluster, cluster_label, LocationCluster, DEFAULT_CLUSTER_RADIUS_M};
use fleetcoach_types::GeoPoint;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetcoach")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one telemetry ingestion pass with the configured collaborators.
    Poll,
    /// Group a JSON list of positions into proximity clusters.
    Cluster {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CLUSTER_RADIUS_M)]
        radius: f64,
    },
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
        #[arg(long, env = "FLEETCOACH_AUDIT_FILE", default_value = "./audit.jsonl")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    Tail {
        #[arg(long, default_value_t = 10)]
        lines: usize,
    },
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Poll => {
            let cfg = CoachConfig::load()?;
            let coach = CoachingOrchestrator::new(wiring::collaborators(&cfg)?, cfg.settings());
            let summary = coach.poll_telemetry().await?;
            println!("{}", serde_json::to_string(&summary)?);
        }
        Command::Cluster { file, radius } => {
            let positions = read_positions(&file)?;
            for (n, c) in cluster(positions, radius).iter().enumerate() {
                println!("{}", describe(n, c));
            }
        }
        Command::Audit { action, path } => match action {
            AuditCommand::Tail { lines } => {
                for record in tail(&path, lines)? {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
            AuditCommand::Verify => {
                let records = verify_log(&path)?;
                println!("audit log ok ({records} records)");
            }
        },
    }

    Ok(())
}

fn read_positions(path: &Path) -> anyhow::Result<Vec<Option<GeoPoint>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_positions(&text)
}

/// Entries may be null; an exact (0, 0) counts as no fix.
fn parse_positions(text: &str) -> anyhow::Result<Vec<Option<GeoPoint>>> {
    let points: Vec<Option<GeoPoint>> =
        serde_json::from_str(text).context("expected a JSON array of {latitude, longitude}")?;
    Ok(points
        .into_iter()
        .map(|p| p.filter(|p| !p.is_null_island()))
        .collect())
}

fn describe(n: usize, c: &LocationCluster) -> String {
    let members: Vec<String> = c.event_indices.iter().map(|i| i.to_string()).collect();
    format!(
        "{} {:.5},{:.5} {} positions [{}]",
        cluster_label(n),
        c.centroid.latitude,
        c.centroid.longitude,
        c.event_indices.len(),
        members.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_null_island_are_skipped() {
        let positions = parse_positions(
            r#"[{"latitude": 40.0, "longitude": -74.0}, null, {"latitude": 0.0, "longitude": 0.0}]"#,
        )
        .unwrap();
        assert_eq!(positions.len(), 3);
        assert!(positions[0].is_some());
        assert!(positions[1].is_none());
        assert!(positions[2].is_none());
    }

    #[test]
    fn clusters_print_with_letter_labels() {
        let positions = parse_positions(
            r#"[{"latitude": 40.0, "longitude": -74.0},
                {"latitude": 40.0005, "longitude": -74.0},
                {"latitude": 41.0, "longitude": -74.0}]"#,
        )
        .unwrap();
        let clusters = cluster(positions, DEFAULT_CLUSTER_RADIUS_M);
        assert_eq!(clusters.len(), 1);
        assert_eq!(
            describe(0, &clusters[0]),
            "A 40.00000,-74.00000 2 positions [0,1]"
        );
    }

    #[test]
    fn non_array_input_is_rejected() {
        assert!(parse_positions(r#"{"latitude": 1.0}"#).is_err());
    }
}
