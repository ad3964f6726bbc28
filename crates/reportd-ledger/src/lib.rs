//! `reportd-ledger`: SQLite persistence for schedules, runs and settings.
//!
//! The ledger is the single source of truth for run state. Single-flight per
//! schedule is enforced by a partial unique index, so concurrent claims for
//! the same schedule cannot both succeed.

pub mod db;
pub mod error;
pub mod ledger;
mod rows;
mod runs;
mod settings;

pub use db::init_db;
pub use error::{LedgerError, Result};
pub use ledger::Ledger;
