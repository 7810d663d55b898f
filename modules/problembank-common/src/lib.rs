pub mod config;
pub mod cycle;
pub mod error;
pub mod types;

pub use config::Config;
pub use cycle::*;
pub use error::{ProblemBankError, Result};
pub use types::*;
