pub mod database;
pub mod error_handling;
pub mod in_memory_queue;
pub mod timeout_handler;

pub use database::*;
pub use in_memory_queue::InMemoryQueue;
