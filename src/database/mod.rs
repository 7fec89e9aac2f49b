//! Database pool bootstrap and schema migrations.

mod connection;

pub use connection::{connect, run_migrations};
