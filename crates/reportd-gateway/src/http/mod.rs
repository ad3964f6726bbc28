pub mod error;
pub mod health;
pub mod runs;
pub mod schedules;
pub mod settings;
