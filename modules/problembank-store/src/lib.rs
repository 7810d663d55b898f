//! Persistence for the problem bank.
//!
//! `ProblemStore` and `CycleSource` are the only seams the pipeline talks to.
//! `PgProblemStore` implements both over Postgres; with the `test-utils`
//! feature, `testing` provides in-memory doubles for deterministic tests.

pub mod postgres;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use postgres::PgProblemStore;
pub use traits::{CycleSource, ProblemStore};
