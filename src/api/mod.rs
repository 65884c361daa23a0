pub mod error;
pub mod models;
pub mod routes;

pub use routes::configure;
