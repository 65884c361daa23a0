pub mod connection;
pub mod models;
pub mod service;
pub mod store;

pub use connection::{get_connection, DbPool};
pub use models::*;
pub use store::{DuckDbStore, MessageStore, SessionStore};
