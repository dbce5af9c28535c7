pub mod cards;
pub mod database;
pub mod error;
pub mod schema;

pub use cards::{CardRepo, SeedList, SeedReport};
pub use database::Database;
pub use error::StoreError;
