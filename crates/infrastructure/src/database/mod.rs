pub mod manager;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::PostgresQueue;
pub use sqlite::SqliteQueue;
