pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_read_only, connect_with_settings, DbPool};
pub use fixtures::{DemoSalesDataset, SeedResult};
pub use repositories::{
    InMemorySessionStore, PendingEntry, ProductSummary, RepositoryError, SalesRepository, SessionStore,
    SqlSalesRepository, SqlSessionStore,
};
