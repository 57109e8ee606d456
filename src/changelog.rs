//! Changelog model
//!
//! A changelog is an ordered list of changesets loaded from a JSON or YAML file:
//!
//! ```yaml
//! filename: changelog.yaml
//! changesets:
//!   - id: "001-create-users"
//!     author: ops
//!     comment: users table
//!     up:
//!       - CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR(255) NOT NULL)
//!       - sql: CREATE INDEX CONCURRENTLY idx_users_email ON users (email)
//!         dbms: [postgres]
//!     down:
//!       - DROP TABLE users
//! ```
//!
//! Changesets apply in file order, at most once per database. The `filename` is the
//! changelog's canonical name in the bookkeeping table; it defaults to the file name.

use crate::connection::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

mod checksum;

pub use checksum::calculate_checksum;

/// Longest description stored in the bookkeeping table
const MAX_DESCRIPTION_LEN: usize = 255;

/// Splits a statement body on `;` at end of line
static STATEMENT_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r";[ \t]*(?:\r?\n|$)").expect("statement separator pattern is valid"));

/// Changelog load/validation error
#[derive(Debug, thiserror::Error)]
pub enum ChangelogError {
    #[error("Failed to read changelog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON changelog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid YAML changelog: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unsupported changelog format for {0} (expected .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),
    #[error("Changeset id must not be empty")]
    EmptyId,
    #[error("Duplicate changeset id '{0}'")]
    DuplicateId(String),
    #[error("Changeset '{0}' has no up statements")]
    EmptyChangeSet(String),
}

/// One SQL statement of a changeset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Statement {
    /// Runs on every engine
    Sql(String),
    /// Runs only on the listed engines (all engines when the list is empty)
    Scoped {
        sql: String,
        #[serde(default)]
        dbms: Vec<Engine>,
    },
}

impl Statement {
    pub fn sql(&self) -> &str {
        match self {
            Statement::Sql(sql) | Statement::Scoped { sql, .. } => sql,
        }
    }

    pub fn applies_to(&self, engine: Engine) -> bool {
        match self {
            Statement::Sql(_) => true,
            Statement::Scoped { dbms, .. } => dbms.is_empty() || dbms.contains(&engine),
        }
    }
}

/// An identified, ordered unit of schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeSet {
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub up: Vec<Statement>,
    #[serde(default)]
    pub down: Vec<Statement>,
}

impl ChangeSet {
    /// Executable `up` statements for `engine`, split into single statements
    pub fn up_sql(&self, engine: Engine) -> Vec<String> {
        statements_for(&self.up, engine)
    }

    /// Executable `down` statements for `engine`
    pub fn down_sql(&self, engine: Engine) -> Vec<String> {
        statements_for(&self.down, engine)
    }

    pub fn checksum(&self) -> String {
        calculate_checksum(self)
    }

    /// First line of the comment, truncated to fit the bookkeeping column
    pub fn description(&self) -> Option<String> {
        let line = self.comment.as_deref()?.lines().next()?.trim();
        if line.is_empty() {
            return None;
        }
        Some(line.chars().take(MAX_DESCRIPTION_LEN).collect())
    }
}

fn statements_for(statements: &[Statement], engine: Engine) -> Vec<String> {
    statements
        .iter()
        .filter(|s| s.applies_to(engine))
        .flat_map(|s| split_statements(s.sql()))
        .collect()
}

/// Split a SQL body into single statements
///
/// Statements are separated by a `;` that ends a line. A `;` in the middle of a line
/// (for example inside a string literal) does not split.
pub fn split_statements(sql: &str) -> Vec<String> {
    STATEMENT_END
        .split(sql)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangelogFile {
    #[serde(default)]
    filename: Option<String>,
    changesets: Vec<ChangeSet>,
}

/// Ordered, validated changesets plus the canonical changelog filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changelog {
    filename: String,
    changesets: Vec<ChangeSet>,
}

impl Changelog {
    /// Build a changelog from changesets in apply order
    ///
    /// # Errors
    ///
    /// Rejects empty or duplicate ids and changesets without `up` statements.
    pub fn new(filename: impl Into<String>, changesets: Vec<ChangeSet>) -> Result<Self, ChangelogError> {
        let mut seen = HashSet::new();
        for cs in &changesets {
            if cs.id.trim().is_empty() {
                return Err(ChangelogError::EmptyId);
            }
            if !seen.insert(cs.id.as_str()) {
                return Err(ChangelogError::DuplicateId(cs.id.clone()));
            }
            if cs.up.iter().all(|s| s.sql().trim().is_empty()) {
                return Err(ChangelogError::EmptyChangeSet(cs.id.clone()));
            }
        }
        Ok(Self {
            filename: filename.into(),
            changesets,
        })
    }

    /// Load a changelog file; the format follows the extension
    pub fn from_path(path: &Path) -> Result<Self, ChangelogError> {
        let content = std::fs::read_to_string(path).map_err(|source| ChangelogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let default_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "changelog".to_string());

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        let changelog = match extension.as_deref() {
            Some("json") => Self::from_json_str(&default_name, &content)?,
            Some("yaml" | "yml") => Self::from_yaml_str(&default_name, &content)?,
            _ => return Err(ChangelogError::UnsupportedFormat(path.to_path_buf())),
        };
        log::debug!(
            "Loaded changelog {} ({} changesets) from {}",
            changelog.filename,
            changelog.changesets.len(),
            path.display()
        );
        Ok(changelog)
    }

    pub fn from_json_str(default_filename: &str, content: &str) -> Result<Self, ChangelogError> {
        let file: ChangelogFile = serde_json::from_str(content)?;
        Self::from_file(default_filename, file)
    }

    pub fn from_yaml_str(default_filename: &str, content: &str) -> Result<Self, ChangelogError> {
        let file: ChangelogFile = serde_yaml::from_str(content)?;
        Self::from_file(default_filename, file)
    }

    fn from_file(default_filename: &str, file: ChangelogFile) -> Result<Self, ChangelogError> {
        let filename = file
            .filename
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| default_filename.to_string());
        Self::new(filename, file.changesets)
    }

    /// Canonical filename recorded in the bookkeeping table
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn changesets(&self) -> &[ChangeSet] {
        &self.changesets
    }

    pub fn get(&self, id: &str) -> Option<&ChangeSet> {
        self.changesets.iter().find(|cs| cs.id == id)
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
filename: app-changelog.yaml
changesets:
  - id: "001"
    author: ops
    comment: |
      create widgets
      second line
    up:
      - CREATE TABLE widgets (id INTEGER PRIMARY KEY, name VARCHAR(64))
      - sql: CREATE INDEX idx_widgets_name ON widgets (name)
        dbms: [postgres, mysql]
    down:
      - DROP TABLE widgets
  - id: "002"
    up:
      - |
        ALTER TABLE widgets ADD COLUMN note VARCHAR(255);
        UPDATE widgets SET note = 'a;b';
"#;

    #[test]
    fn test_yaml_changelog_loads() {
        let changelog = Changelog::from_yaml_str("fallback.yaml", YAML).unwrap();
        assert_eq!(changelog.filename(), "app-changelog.yaml");
        assert_eq!(changelog.len(), 2);

        let first = &changelog.changesets()[0];
        assert_eq!(first.author, "ops");
        assert_eq!(first.description().as_deref(), Some("create widgets"));
        assert_eq!(first.up_sql(Engine::Sqlite).len(), 1);
        assert_eq!(first.up_sql(Engine::Postgres).len(), 2);
        assert_eq!(first.down_sql(Engine::MySql), vec!["DROP TABLE widgets".to_string()]);

        let second = changelog.get("002").unwrap();
        assert_eq!(second.author, "");
        assert_eq!(
            second.up_sql(Engine::Sqlite),
            vec![
                "ALTER TABLE widgets ADD COLUMN note VARCHAR(255)".to_string(),
                "UPDATE widgets SET note = 'a;b'".to_string(),
            ]
        );
        assert!(second.down.is_empty());
    }

    #[test]
    fn test_json_changelog_defaults_filename() {
        let json = r#"{"changesets": [{"id": "a", "author": "me", "up": ["CREATE TABLE a (id INT)"]}]}"#;
        let changelog = Changelog::from_json_str("db.changelog.json", json).unwrap();
        assert_eq!(changelog.filename(), "db.changelog.json");
        assert_eq!(changelog.changesets()[0].description(), None);
    }

    #[test]
    fn test_validation() {
        let cs = |id: &str, up: &[&str]| ChangeSet {
            id: id.to_string(),
            author: String::new(),
            comment: None,
            up: up.iter().map(|s| Statement::Sql(s.to_string())).collect(),
            down: Vec::new(),
        };
        assert!(matches!(
            Changelog::new("c", vec![cs("a", &["SELECT 1"]), cs("a", &["SELECT 2"])]),
            Err(ChangelogError::DuplicateId(id)) if id == "a"
        ));
        assert!(matches!(
            Changelog::new("c", vec![cs(" ", &["SELECT 1"])]),
            Err(ChangelogError::EmptyId)
        ));
        assert!(matches!(
            Changelog::new("c", vec![cs("a", &[])]),
            Err(ChangelogError::EmptyChangeSet(_))
        ));
        assert!(matches!(
            Changelog::new("c", vec![cs("a", &["  "])]),
            Err(ChangelogError::EmptyChangeSet(_))
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = "changesets:\n  - id: a\n    up: [SELECT 1]\n    donw: [SELECT 2]\n";
        assert!(matches!(
            Changelog::from_yaml_str("c.yaml", yaml),
            Err(ChangelogError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_path_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("changes.yml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert_eq!(Changelog::from_path(&yaml_path).unwrap().len(), 2);

        let txt_path = dir.path().join("changes.txt");
        std::fs::write(&txt_path, YAML).unwrap();
        assert!(matches!(
            Changelog::from_path(&txt_path),
            Err(ChangelogError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            Changelog::from_path(&dir.path().join("absent.json")),
            Err(ChangelogError::Io { .. })
        ));
    }

    #[test]
    fn test_split_statements() {
        assert_eq!(split_statements("SELECT 1"), vec!["SELECT 1".to_string()]);
        assert_eq!(
            split_statements("SELECT 1;\r\nSELECT 2;  \n\n"),
            vec!["SELECT 1".to_string(), "SELECT 2".to_string()]
        );
        assert_eq!(
            split_statements("INSERT INTO t VALUES ('x;y'); SELECT 2;"),
            vec!["INSERT INTO t VALUES ('x;y'); SELECT 2".to_string()]
        );
        assert!(split_statements(" ;\n").is_empty());
    }

    #[test]
    fn test_multi_statement_body_is_split_per_engine() {
        let changeset = ChangeSet {
            id: "multi".to_string(),
            author: "test".to_string(),
            comment: None,
            up: vec![Statement::Sql(
                "CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER);\n".to_string(),
            )],
            down: Vec::new(),
        };
        assert_eq!(
            changeset.up_sql(Engine::Sqlite),
            vec![
                "CREATE TABLE a (id INTEGER)".to_string(),
                "CREATE TABLE b (id INTEGER)".to_string()
            ]
        );
    }
}
