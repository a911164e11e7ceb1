//! Settings persistence
//!
//! A small SQLite key-value table holds the values that should survive a
//! restart: volume, karaoke cutoff and the last sleep timer config.

pub mod init;
pub mod settings;

pub use init::init_database;
