//! Rows of the bookkeeping and lock tables

use crate::executor::{DockError, DockRow};
use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp the way bookkeeping columns store it
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, DockError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DockError::ParseError(format!("Failed to parse {column} '{raw}': {e}")))
}

/// A changeset recorded in `drydock_changelog`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChangeSet {
    pub id: String,
    pub author: String,
    /// Changelog the changeset came from
    pub filename: String,
    pub date_executed: DateTime<Utc>,
    /// Position in the database's execution history, starting at 1
    pub order_executed: i64,
    /// `None` after a forced run cleared it; backfilled on the next listing
    pub checksum: Option<String>,
    pub description: Option<String>,
}

impl AppliedChangeSet {
    /// Create an `AppliedChangeSet` from a database row
    ///
    /// Expected column order: `id`, `author`, `filename`, `dateexecuted`,
    /// `orderexecuted`, `checksum`, `description`
    ///
    /// # Errors
    ///
    /// Returns `DockError::ParseError` if a column is missing or `dateexecuted` is not
    /// an RFC 3339 timestamp.
    pub fn from_row(row: &DockRow) -> Result<Self, DockError> {
        Ok(Self {
            id: row.get_string(0)?,
            author: row.get_opt_string(1)?.unwrap_or_default(),
            filename: row.get_string(2)?,
            date_executed: parse_timestamp("dateexecuted", &row.get_string(3)?)?,
            order_executed: row.get_i64(4)?,
            checksum: row.get_opt_string(5)?,
            description: row.get_opt_string(6)?,
        })
    }
}

/// A held row of `drydock_changelog_lock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub id: i64,
    pub granted: Option<DateTime<Utc>>,
    /// `<host>:<process uuid>` of the holder
    pub locked_by: Option<String>,
}

impl LockRecord {
    /// Expected column order: `id`, `lockgranted`, `lockedby`
    pub fn from_row(row: &DockRow) -> Result<Self, DockError> {
        let granted = row
            .get_opt_string(1)?
            .map(|raw| parse_timestamp("lockgranted", &raw))
            .transpose()?;
        Ok(Self {
            id: row.get_i64(0)?,
            granted,
            locked_by: row.get_opt_string(2)?,
        })
    }

    /// Holder description for operator-facing messages
    pub fn describe(&self) -> String {
        let holder = self.locked_by.as_deref().unwrap_or("unknown holder");
        match self.granted {
            Some(at) => format!("{holder} (since {})", format_timestamp(at)),
            None => holder.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DockValue;
    use chrono::TimeZone;

    fn text(s: &str) -> DockValue {
        DockValue::Text(s.to_string())
    }

    #[test]
    fn test_applied_from_row() {
        let row = DockRow::new(vec![
            text("001"),
            text("ops"),
            text("changelog.yaml"),
            text("2024-01-20T12:00:00.000Z"),
            DockValue::Int(3),
            DockValue::Null,
            text("create users"),
        ]);
        let record = AppliedChangeSet::from_row(&row).unwrap();
        assert_eq!(record.id, "001");
        assert_eq!(record.order_executed, 3);
        assert_eq!(record.checksum, None);
        assert_eq!(
            record.date_executed,
            Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_applied_from_row_rejects_bad_timestamp() {
        let row = DockRow::new(vec![
            text("001"),
            DockValue::Null,
            text("changelog.yaml"),
            text("yesterday"),
            DockValue::Int(1),
            DockValue::Null,
            DockValue::Null,
        ]);
        assert!(matches!(
            AppliedChangeSet::from_row(&row),
            Err(DockError::ParseError(_))
        ));
    }

    #[test]
    fn test_lock_record_describe() {
        let row = DockRow::new(vec![
            DockValue::Int(1),
            text("2024-01-20T12:00:00.000Z"),
            text("web-1:abc"),
        ]);
        let lock = LockRecord::from_row(&row).unwrap();
        assert_eq!(lock.describe(), "web-1:abc (since 2024-01-20T12:00:00.000Z)");

        let anonymous = LockRecord {
            id: 1,
            granted: None,
            locked_by: None,
        };
        assert_eq!(anonymous.describe(), "unknown holder");
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let at = Utc.with_ymd_and_hms(2030, 5, 6, 7, 8, 9).unwrap();
        let formatted = format_timestamp(at);
        assert_eq!(formatted, "2030-05-06T07:08:09.000Z");
        assert_eq!(parse_timestamp("x", &formatted).unwrap(), at);
    }
}
