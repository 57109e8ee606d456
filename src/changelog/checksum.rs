//! Checksum calculation for changesets

use super::{ChangeSet, Statement};
use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of a changeset
///
/// Covers the id and every `up` statement together with its engine restriction, so
/// editing an applied changeset is detected on the next run. `down` statements and
/// the comment are not covered.
///
/// # Returns
///
/// Returns the hexadecimal SHA-256 hash
pub fn calculate_checksum(changeset: &ChangeSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(changeset.id.as_bytes());
    hasher.update(b"\n");
    for statement in &changeset.up {
        if let Statement::Scoped { dbms, .. } = statement {
            let engines: Vec<&str> = dbms.iter().map(|e| e.as_str()).collect();
            hasher.update(engines.join(",").as_bytes());
        }
        hasher.update(b"\n");
        hasher.update(statement.sql().trim().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Engine;

    fn changeset(up: Vec<Statement>) -> ChangeSet {
        ChangeSet {
            id: "001".to_string(),
            author: "ops".to_string(),
            comment: None,
            up,
            down: Vec::new(),
        }
    }

    #[test]
    fn test_checksum_is_stable_hex() {
        let cs = changeset(vec![Statement::Sql("CREATE TABLE a (id INT)".to_string())]);
        let first = calculate_checksum(&cs);
        assert_eq!(first, calculate_checksum(&cs.clone()));
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_checksum_ignores_surrounding_whitespace_and_comment() {
        let a = changeset(vec![Statement::Sql("CREATE TABLE a (id INT)".to_string())]);
        let mut b = changeset(vec![Statement::Sql("  CREATE TABLE a (id INT)\n".to_string())]);
        b.comment = Some("reworded".to_string());
        b.down = vec![Statement::Sql("DROP TABLE a".to_string())];
        assert_eq!(calculate_checksum(&a), calculate_checksum(&b));
    }

    #[test]
    fn test_checksum_detects_edits() {
        let a = changeset(vec![Statement::Sql("CREATE TABLE a (id INT)".to_string())]);
        let edited = changeset(vec![Statement::Sql("CREATE TABLE a (id BIGINT)".to_string())]);
        let scoped = changeset(vec![Statement::Scoped {
            sql: "CREATE TABLE a (id INT)".to_string(),
            dbms: vec![Engine::Postgres],
        }]);
        assert_ne!(calculate_checksum(&a), calculate_checksum(&edited));
        assert_ne!(calculate_checksum(&a), calculate_checksum(&scoped));
    }
}
