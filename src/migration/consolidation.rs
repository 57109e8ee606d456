//! Changeset consolidation
//!
//! Older deployments recorded changesets under several changelog filenames. Before
//! anything is listed or applied, every bookkeeping row is rewritten to the canonical
//! filename so each changeset is recognised as applied exactly once.

use crate::engine::{ChangelogEngine, EngineError};

/// Rewrite bookkeeping filenames to the changelog's canonical filename
///
/// A database without a bookkeeping table is left untouched. Running this twice
/// leaves the rows exactly as one run does.
pub fn consolidate_changesets(engine: &dyn ChangelogEngine) -> Result<(), EngineError> {
    if !engine.bookkeeping_exists()? {
        log::debug!("No bookkeeping table yet; nothing to consolidate");
        return Ok(());
    }
    let filename = engine.changelog().filename();
    let rows = engine.consolidate_filenames(filename)?;
    log::debug!("Consolidated {rows} bookkeeping row(s) under {filename}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{ChangeSet, Changelog, Statement};
    use crate::engine::SqlChangelogEngine;
    use crate::executor::{DockExecutor, SqliteExecutor};

    fn changelog(filename: &str) -> Changelog {
        Changelog::new(
            filename,
            vec![ChangeSet {
                id: "001".to_string(),
                author: "ops".to_string(),
                comment: None,
                up: vec![Statement::Sql("CREATE TABLE a (id INTEGER)".to_string())],
                down: Vec::new(),
            }],
        )
        .unwrap()
    }

    fn filenames(executor: &SqliteExecutor) -> Vec<String> {
        executor
            .query_all("SELECT filename FROM drydock_changelog ORDER BY orderexecuted")
            .unwrap()
            .iter()
            .map(|r| r.get_string(0).unwrap())
            .collect()
    }

    #[test]
    fn test_fresh_database_untouched() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let changelog = changelog("changelog.yaml");
        let engine = SqlChangelogEngine::new(&executor, &changelog);
        consolidate_changesets(&engine).unwrap();
        assert!(!engine.bookkeeping_exists().unwrap());
    }

    #[test]
    fn test_rows_move_to_canonical_filename() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let legacy = changelog("migrations/legacy-changelog.xml");
        SqlChangelogEngine::new(&executor, &legacy).update().unwrap();
        assert_eq!(filenames(&executor), vec!["migrations/legacy-changelog.xml"]);

        let current = changelog("changelog.yaml");
        let engine = SqlChangelogEngine::new(&executor, &current);
        consolidate_changesets(&engine).unwrap();
        assert_eq!(filenames(&executor), vec!["changelog.yaml"]);
        assert!(engine.unrun_changesets().unwrap().is_empty());
    }

    #[test]
    fn test_consolidation_is_idempotent() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let legacy = changelog("old.json");
        SqlChangelogEngine::new(&executor, &legacy).update().unwrap();

        let current = changelog("changelog.yaml");
        let engine = SqlChangelogEngine::new(&executor, &current);
        let snapshot = || executor.query_all("SELECT * FROM drydock_changelog").unwrap();

        consolidate_changesets(&engine).unwrap();
        let once = snapshot();
        consolidate_changesets(&engine).unwrap();
        assert_eq!(snapshot(), once);
    }
}
