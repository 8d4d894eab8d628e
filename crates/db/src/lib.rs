pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{
    KnowledgeSeedDataset, SeedFaultCode, SeedResult, VerificationResult, SEED_FAULT_CODES,
};
pub use repositories::{
    DiagnosticStore, FailurePoint, InMemoryDiagnosticStore, MemoryTable, QueryError,
    RepositoryError, SqlDiagnosticStore, StoreTransaction,
};
