//! # Maintenance Jobs
//!
//! Explicitly invoked jobs that move and repair stored data. None of them
//! runs from a read path; the settings screen (or the embedding application)
//! triggers them.
//!
//! - [`migration`]: moves key-value data into the structured store
//! - [`integrity`]: detects and removes malformed file records and
//!   interrupted chunked uploads, and reports unreferenced files

pub mod integrity;
pub mod migration;

pub use integrity::{IntegrityJob, IntegrityReport, InvalidCleanupReport};
pub use migration::MigrationReport;
