//! Bookkeeping and lock table SQL, rendered per engine with `sea-query`

use crate::connection::Engine;
use sea_query::*;

pub const CHANGELOG_TABLE: &str = "drydock_changelog";
pub const LOCK_TABLE: &str = "drydock_changelog_lock";

/// The lock table holds exactly one row with this id
pub const LOCK_ROW_ID: i64 = 1;

const CHANGELOG_COLUMNS: [&str; 7] = [
    "id",
    "author",
    "filename",
    "dateexecuted",
    "orderexecuted",
    "checksum",
    "description",
];

macro_rules! render {
    ($engine:expr, $stmt:expr) => {
        match $engine {
            Engine::Sqlite => $stmt.to_string(SqliteQueryBuilder),
            Engine::Postgres => $stmt.to_string(PostgresQueryBuilder),
            Engine::MySql => $stmt.to_string(MysqlQueryBuilder),
        }
    };
}

macro_rules! render_schema {
    ($engine:expr, $stmt:expr) => {
        match $engine {
            Engine::Sqlite => $stmt.build(SqliteQueryBuilder),
            Engine::Postgres => $stmt.build(PostgresQueryBuilder),
            Engine::MySql => $stmt.build(MysqlQueryBuilder),
        }
    };
}

/// Create the `drydock_changelog` bookkeeping table
pub fn create_changelog_table(engine: Engine) -> String {
    let stmt = Table::create()
        .table(CHANGELOG_TABLE)
        .if_not_exists()
        .col(ColumnDef::new("id").string_len(255).not_null())
        .col(ColumnDef::new("author").string_len(255).not_null())
        .col(ColumnDef::new("filename").string_len(255).not_null())
        .col(ColumnDef::new("dateexecuted").string_len(64).not_null())
        .col(ColumnDef::new("orderexecuted").big_integer().not_null())
        .col(ColumnDef::new("checksum").string_len(64).null())
        .col(ColumnDef::new("description").string_len(255).null())
        .to_owned();
    render_schema!(engine, stmt)
}

/// Create the `drydock_changelog_lock` table
pub fn create_lock_table(engine: Engine) -> String {
    let stmt = Table::create()
        .table(LOCK_TABLE)
        .if_not_exists()
        .col(
            ColumnDef::new("id")
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new("locked").boolean().not_null())
        .col(ColumnDef::new("lockgranted").string_len(64).null())
        .col(ColumnDef::new("lockedby").string_len(255).null())
        .to_owned();
    render_schema!(engine, stmt)
}

/// Count rows of the lock table
pub fn count_lock_rows(engine: Engine) -> String {
    let stmt = Query::select()
        .expr(Expr::cust("COUNT(*)"))
        .from(LOCK_TABLE)
        .to_owned();
    render!(engine, stmt)
}

/// Insert the single, unlocked lock row
pub fn seed_lock_row(engine: Engine) -> String {
    let stmt = Query::insert()
        .into_table(LOCK_TABLE)
        .columns(["id", "locked"])
        .values_panic([LOCK_ROW_ID.into(), false.into()])
        .to_owned();
    render!(engine, stmt)
}

/// Whether a table exists in the connection's current schema
pub fn table_exists(engine: Engine, table: &str) -> String {
    let table = table.replace('\'', "''");
    match engine {
        Engine::Sqlite => {
            format!("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{table}'")
        }
        Engine::Postgres => format!(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = '{table}'"
        ),
        Engine::MySql => format!(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = '{table}'"
        ),
    }
}

/// All bookkeeping rows in execution order
pub fn select_applied(engine: Engine) -> String {
    let stmt = Query::select()
        .columns(CHANGELOG_COLUMNS)
        .from(CHANGELOG_TABLE)
        .order_by("orderexecuted", Order::Asc)
        .to_owned();
    render!(engine, stmt)
}

pub fn select_max_order(engine: Engine) -> String {
    let stmt = Query::select()
        .expr(Expr::cust("COALESCE(MAX(orderexecuted), 0)"))
        .from(CHANGELOG_TABLE)
        .to_owned();
    render!(engine, stmt)
}

/// Values of one bookkeeping row
pub struct RanChangeSet<'a> {
    pub id: &'a str,
    pub author: &'a str,
    pub filename: &'a str,
    pub date_executed: &'a str,
    pub order_executed: i64,
    pub checksum: &'a str,
    pub description: Option<String>,
}

pub fn insert_ran(engine: Engine, row: &RanChangeSet<'_>) -> String {
    let stmt = Query::insert()
        .into_table(CHANGELOG_TABLE)
        .columns(CHANGELOG_COLUMNS)
        .values_panic([
            row.id.into(),
            row.author.into(),
            row.filename.into(),
            row.date_executed.into(),
            row.order_executed.into(),
            row.checksum.into(),
            row.description.clone().into(),
        ])
        .to_owned();
    render!(engine, stmt)
}

pub fn delete_ran(engine: Engine, id: &str, filename: &str) -> String {
    let stmt = Query::delete()
        .from_table(CHANGELOG_TABLE)
        .and_where(Expr::col("id").eq(id))
        .and_where(Expr::col("filename").eq(filename))
        .to_owned();
    render!(engine, stmt)
}

pub fn update_checksum(engine: Engine, id: &str, filename: &str, checksum: &str) -> String {
    let stmt = Query::update()
        .table(CHANGELOG_TABLE)
        .value("checksum", checksum)
        .and_where(Expr::col("id").eq(id))
        .and_where(Expr::col("filename").eq(filename))
        .to_owned();
    render!(engine, stmt)
}

pub fn clear_checksums(engine: Engine) -> String {
    let stmt = Query::update()
        .table(CHANGELOG_TABLE)
        .value("checksum", Option::<String>::None)
        .to_owned();
    render!(engine, stmt)
}

/// Rewrite every bookkeeping row's filename
pub fn set_filenames(engine: Engine, filename: &str) -> String {
    let stmt = Query::update()
        .table(CHANGELOG_TABLE)
        .value("filename", filename)
        .to_owned();
    render!(engine, stmt)
}

/// Take the lock row only if it is free; zero affected rows means someone holds it
pub fn acquire_lock(engine: Engine, granted: &str, holder: &str) -> String {
    let stmt = Query::update()
        .table(LOCK_TABLE)
        .value("locked", true)
        .value("lockgranted", granted)
        .value("lockedby", holder)
        .and_where(Expr::col("id").eq(LOCK_ROW_ID))
        .and_where(Expr::col("locked").eq(false))
        .to_owned();
    render!(engine, stmt)
}

fn unlock(engine: Engine, only_lock_row: bool) -> String {
    let mut stmt = Query::update()
        .table(LOCK_TABLE)
        .value("locked", false)
        .value("lockgranted", Option::<String>::None)
        .value("lockedby", Option::<String>::None)
        .to_owned();
    if only_lock_row {
        stmt.and_where(Expr::col("id").eq(LOCK_ROW_ID));
    }
    render!(engine, stmt)
}

pub fn release_lock(engine: Engine) -> String {
    unlock(engine, true)
}

/// Clear every lock row, whoever holds it
pub fn force_release_locks(engine: Engine) -> String {
    unlock(engine, false)
}

pub fn select_held_locks(engine: Engine) -> String {
    let stmt = Query::select()
        .columns(["id", "lockgranted", "lockedby"])
        .from(LOCK_TABLE)
        .and_where(Expr::col("locked").eq(true))
        .order_by("id", Order::Asc)
        .to_owned();
    render!(engine, stmt)
}
