//! Command handlers
//!
//! Each handler resolves the target database and changelog, runs one driver call and
//! returns the text to print.

use crate::cli::Cli;
use anyhow::{Context, Result};
use colored::Colorize;
use drydock::changelog::Changelog;
use drydock::connection::ConnectionDetails;
use drydock::migration::{MigrationDriver, MigrationOutcome, MigrationStatus};
use drydock::DrydockConfig;
use std::fmt::Write;

/// Environment variables consulted, in order, when `--database-url` is absent
const URL_VARS: [&str; 2] = ["DRYDOCK_DATABASE_URL", "DATABASE_URL"];

/// Pick the database: `--database-url`, then the URL variables, then configuration
pub fn resolve_details(cli: &Cli, config: &DrydockConfig) -> Result<ConnectionDetails> {
    let url = cli
        .database_url
        .clone()
        .or_else(|| URL_VARS.iter().find_map(|var| std::env::var(var).ok()));
    let details = match url {
        Some(url) => ConnectionDetails::from_uri(&url)?,
        None => config
            .database
            .connection_details()
            .context("No database configured. Use --database-url, set DRYDOCK_DATABASE_URL or DATABASE_URL, or add a [database] section")?,
    };
    Ok(details)
}

/// Run the parsed command and return its report
pub fn run(cli: &Cli) -> Result<String> {
    let config = DrydockConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    let details = resolve_details(cli, &config)?;
    let changelog_path = cli
        .changelog
        .clone()
        .unwrap_or_else(|| config.migration.changelog.clone());
    let changelog = Changelog::from_path(&changelog_path)
        .with_context(|| format!("Failed to load changelog {}", changelog_path.display()))?;
    log::debug!(
        "Using changelog {} ({} changesets) against {details}",
        changelog_path.display(),
        changelog.len()
    );

    let driver = MigrationDriver::new(changelog);
    match cli.command.direction() {
        None => Ok(render_status(&driver.status(&details)?)),
        Some(direction) => {
            log::info!("Running {direction} against {details}");
            Ok(render_outcome(&driver.migrate(&details, direction)?))
        }
    }
}

pub fn render_outcome(outcome: &MigrationOutcome) -> String {
    match outcome {
        MigrationOutcome::UpToDate => "No changesets to apply".to_string(),
        MigrationOutcome::Applied { count } => {
            format!("Successfully applied {count} changeset(s)")
        }
        MigrationOutcome::Forced {
            applied,
            failed_statements: 0,
        } => format!("Forced {applied} changeset(s)"),
        MigrationOutcome::Forced {
            applied,
            failed_statements,
        } => {
            let skipped = format!("{failed_statements} statement(s)");
            format!("Forced {applied} changeset(s); {} skipped", skipped.as_str().yellow())
        }
        MigrationOutcome::RolledBack { id: Some(id) } => format!("Rolled back changeset {id}"),
        MigrationOutcome::RolledBack { id: None } => "No changesets to roll back".to_string(),
        MigrationOutcome::PendingSql { changesets, .. } if changesets.is_empty() => {
            "-- No pending changesets".to_string()
        }
        MigrationOutcome::PendingSql { sql, .. } => sql.clone(),
        MigrationOutcome::LocksReleased => "Released migration locks".to_string(),
    }
}

pub fn render_status(status: &MigrationStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}\n", "Migration Status".bold());

    if status.applied.is_empty() {
        let _ = writeln!(out, "Applied changesets: None");
    } else {
        let _ = writeln!(out, "Applied changesets ({}):", status.applied.len());
        for record in &status.applied {
            let _ = writeln!(
                out,
                "  {} {}::{} ({}, {})",
                "✓".green(),
                record.filename,
                record.id,
                record.author,
                record.date_executed.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    out.push('\n');

    if status.pending.is_empty() {
        let _ = writeln!(out, "Pending changesets: None");
    } else {
        let _ = writeln!(out, "Pending changesets ({}):", status.pending.len());
        for id in &status.pending {
            let _ = writeln!(out, "  {} {id}", "⏳".yellow());
        }
    }

    for lock in &status.locks {
        let _ = writeln!(
            out,
            "\n{} migration lock held by {}",
            "⚠".red(),
            lock.describe()
        );
    }

    let _ = write!(
        out,
        "\nSummary: {} applied, {} pending",
        status.applied.len(),
        status.pending.len()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;
    use tempfile::TempDir;

    const CHANGELOG: &str = r#"{
  "changesets": [
    {"id": "001", "author": "ops", "up": ["CREATE TABLE items (id INTEGER)"], "down": ["DROP TABLE items"]},
    {"id": "002", "author": "ops", "up": ["CREATE TABLE tags (id INTEGER)"], "down": ["DROP TABLE tags"]}
  ]
}"#;

    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("changelog.json"), CHANGELOG).unwrap();
        dir
    }

    fn cli(dir: &Path, command: &str) -> Cli {
        let url = format!("sqlite://{}", dir.join("cli.db").display());
        let changelog = dir.join("changelog.json");
        let config = dir.join("absent.toml");
        Cli::try_parse_from([
            "drydock-migrate",
            "--database-url",
            url.as_str(),
            "--changelog",
            changelog.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            command,
        ])
        .unwrap()
    }

    #[test]
    fn test_up_status_down_one() {
        let dir = workspace();

        let status = run(&cli(dir.path(), "status")).unwrap();
        assert!(status.contains("Pending changesets (2)"), "{status}");

        let report = run(&cli(dir.path(), "up")).unwrap();
        assert_eq!(report, "Successfully applied 2 changeset(s)");
        assert_eq!(run(&cli(dir.path(), "up")).unwrap(), "No changesets to apply");

        let status = run(&cli(dir.path(), "status")).unwrap();
        assert!(status.contains("Summary: 2 applied, 0 pending"), "{status}");

        assert_eq!(
            run(&cli(dir.path(), "down-one")).unwrap(),
            "Rolled back changeset 002"
        );
        let sql = run(&cli(dir.path(), "print")).unwrap();
        assert!(sql.contains("CREATE TABLE tags (id INTEGER);"), "{sql}");
    }

    #[test]
    fn test_release_locks_on_fresh_database() {
        let dir = workspace();
        assert_eq!(
            run(&cli(dir.path(), "release-locks")).unwrap(),
            "Released migration locks"
        );
    }

    #[test]
    fn test_missing_changelog_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&cli(dir.path(), "up")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load changelog"));
    }

    #[test]
    fn test_render_outcome() {
        assert_eq!(
            render_outcome(&MigrationOutcome::Forced {
                applied: 2,
                failed_statements: 0
            }),
            "Forced 2 changeset(s)"
        );
        let forced = render_outcome(&MigrationOutcome::Forced {
            applied: 2,
            failed_statements: 1,
        });
        assert!(forced.contains("1 statement(s)"));
        assert_eq!(
            render_outcome(&MigrationOutcome::PendingSql {
                changesets: Vec::new(),
                sql: String::new()
            }),
            "-- No pending changesets"
        );
    }
}
