use thiserror::Error;
use uuid::Uuid;

/// Result type alias for problem bank operations.
pub type Result<T> = std::result::Result<T, ProblemBankError>;

#[derive(Error, Debug)]
pub enum ProblemBankError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The cycle was already extracted. Carries the existing problem id so
    /// callers can treat a retry as success.
    #[error("Cycle {cycle_id} was already extracted into problem {problem_id}")]
    DuplicateExtraction { cycle_id: Uuid, problem_id: Uuid },

    #[error("Cluster slug already taken: {0}")]
    DuplicateSlug(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProblemBankError {
    pub fn cycle_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "Cycle", id }
    }

    pub fn problem_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "Problem", id }
    }

    pub fn cluster_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "Cluster", id }
    }
}

/// Raised when a stored text column holds a value outside a known enum.
#[derive(Error, Debug)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_kind() {
        let id = Uuid::nil();
        let err = ProblemBankError::cluster_not_found(id);
        assert_eq!(err.to_string(), format!("Cluster not found: {id}"));
    }

    #[test]
    fn duplicate_extraction_reports_existing_problem() {
        let cycle_id = Uuid::new_v4();
        let problem_id = Uuid::new_v4();
        let err = ProblemBankError::DuplicateExtraction { cycle_id, problem_id };
        assert!(err.to_string().contains(&problem_id.to_string()));
    }
}
