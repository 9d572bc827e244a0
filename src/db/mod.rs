//! Database layer (PostgreSQL via sqlx).

pub mod store;

pub use store::Store;
