pub mod api;
pub mod chat;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod state;

pub use error::ChatError;
