//! Migration system for drydock
//!
//! This module drives a changelog against a database:
//! - [`MigrationDriver`] runs one [`Direction`] per call inside one transaction
//! - [`LockCoordinator`] waits for and force-clears the advisory lock row
//! - [`consolidate_changesets`] folds legacy bookkeeping filenames into the canonical one
//! - [`MigrationStatus`] reports applied and pending changesets
//!
//! # Example
//!
//! ```rust,no_run
//! use drydock::changelog::Changelog;
//! use drydock::connection::ConnectionDetails;
//! use drydock::migration::{Direction, MigrationDriver, MigrationOutcome};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let changelog = Changelog::from_path(Path::new("migrations/changelog.yaml"))?;
//! let details = ConnectionDetails::from_uri("sqlite://app.db")?;
//! let driver = MigrationDriver::new(changelog);
//!
//! match driver.migrate(&details, Direction::Up)? {
//!     MigrationOutcome::UpToDate => println!("nothing to do"),
//!     MigrationOutcome::Applied { count } => println!("applied {count} changeset(s)"),
//!     other => println!("{other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod consolidation;
pub mod driver;
pub mod error;
pub mod lock;
pub mod status;

pub use consolidation::consolidate_changesets;
pub use driver::{Direction, MigrationDriver, MigrationOutcome, SchemaMigrator};
pub use error::MigrationError;
pub use lock::{LockCoordinator, LockState};
pub use status::MigrationStatus;
