use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{ProblemBankError, Result, UnknownVariant};

/// Maximum stored title length, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Method tag written on every similarity edge.
pub const SIMILARITY_METHOD: &str = "jaccard_theme";

/// Bumped whenever the scoring formula changes, so stale edges can be told apart.
pub const SIMILARITY_ALGORITHM_VERSION: &str = "v1";

// --- Text-backed enums ---

/// Implements `as_str`, `Display`, `FromStr` and `TryFrom<String>` for a
/// fieldless enum stored as a snake_case text column.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;
            fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                s.parse()
            }
        }
    };
}

/// How strongly a problem's demand has been validated, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Unvalidated,
    UserTested,
    DesperateUserConfirmed,
    MarketValidated,
}

text_enum!(ValidationStatus, "validation status", {
    Unvalidated => "unvalidated",
    UserTested => "user_tested",
    DesperateUserConfirmed => "desperate_user_confirmed",
    MarketValidated => "market_validated",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemStatus {
    Open,
    Solved,
}

text_enum!(ProblemStatus, "problem status", {
    Open => "open",
    Solved => "solved",
});

/// Cluster lifecycle. `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Active,
    Archived,
}

text_enum!(ClusterStatus, "cluster status", {
    Active => "active",
    Archived => "archived",
});

/// Whether a cluster or membership came from the theme pass or an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Manual,
    Auto,
}

text_enum!(Origin, "origin", {
    Manual => "manual",
    Auto => "auto",
});

// --- Problems ---

/// A durable problem extracted from an innovation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProblemRecord {
    pub id: Uuid,
    pub title: String,
    pub problem_statement: String,
    pub theme: Option<String>,
    pub who_affected: Option<String>,
    pub when_occurs: Option<String>,
    pub where_occurs: Option<String>,
    pub frequency: Option<String>,
    pub severity_rating: Option<i16>,
    #[sqlx(try_from = "String")]
    pub validation_status: ValidationStatus,
    pub desperate_user_score: Option<i16>,
    #[sqlx(try_from = "String")]
    pub status: ProblemStatus,
    pub is_open_for_attempts: bool,
    pub source_cycle_id: Option<Uuid>,
    pub submitted_by: Uuid,
    pub institution_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProblemRecord {
    pub fn is_open(&self) -> bool {
        self.status == ProblemStatus::Open
    }

    /// Text the similarity engine tokenizes: title, then statement.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.problem_statement)
    }
}

/// Insert parameters for a problem. Stores call [`NewProblem::validate`]
/// before writing.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct NewProblem {
    #[builder(setter(into))]
    pub title: String,
    #[builder(setter(into))]
    pub problem_statement: String,
    #[builder(default)]
    pub theme: Option<String>,
    #[builder(default)]
    pub who_affected: Option<String>,
    #[builder(default)]
    pub when_occurs: Option<String>,
    #[builder(default)]
    pub where_occurs: Option<String>,
    #[builder(default)]
    pub frequency: Option<String>,
    #[builder(default)]
    pub severity_rating: Option<i16>,
    #[builder(default = ValidationStatus::Unvalidated)]
    pub validation_status: ValidationStatus,
    #[builder(default)]
    pub desperate_user_score: Option<i16>,
    #[builder(default = ProblemStatus::Open)]
    pub status: ProblemStatus,
    #[builder(default = true)]
    pub is_open_for_attempts: bool,
    #[builder(default)]
    pub source_cycle_id: Option<Uuid>,
    pub submitted_by: Uuid,
    #[builder(default)]
    pub institution_id: Option<Uuid>,
    #[builder(default = serde_json::Value::Object(Default::default()))]
    pub metadata: serde_json::Value,
}

impl NewProblem {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ProblemBankError::Validation("title is required".into()));
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err(ProblemBankError::Validation(format!(
                "title exceeds {MAX_TITLE_CHARS} characters"
            )));
        }
        if self.problem_statement.trim().is_empty() {
            return Err(ProblemBankError::Validation(
                "problem_statement is required".into(),
            ));
        }
        if let Some(severity) = self.severity_rating {
            if !(1..=10).contains(&severity) {
                return Err(ProblemBankError::Validation(format!(
                    "severity_rating must be 1-10, got {severity}"
                )));
            }
        }
        if let Some(score) = self.desperate_user_score {
            if !(0..=5).contains(&score) {
                return Err(ProblemBankError::Validation(format!(
                    "desperate_user_score must be 0-5, got {score}"
                )));
            }
        }
        Ok(())
    }
}

/// Truncate to [`MAX_TITLE_CHARS`] characters, ending in an ellipsis when cut.
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let mut cut: String = title.chars().take(MAX_TITLE_CHARS - 1).collect();
    cut.push('…');
    cut
}

// --- Evidence ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Evidence {
    pub id: Uuid,
    pub problem_id: Uuid,
    pub content: String,
    pub source_name: Option<String>,
    pub source_role: Option<String>,
    pub pain_level: Option<i16>,
    pub collected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvidence {
    pub problem_id: Uuid,
    pub content: String,
    pub source_name: Option<String>,
    pub source_role: Option<String>,
    pub pain_level: Option<i16>,
    pub collected_at: DateTime<Utc>,
}

// --- Similarity ---

/// An unordered pair of problems stored with the smaller id first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SimilarityEdge {
    pub problem_a_id: Uuid,
    pub problem_b_id: Uuid,
    pub similarity_score: f64,
    pub method: String,
    pub computed_at: DateTime<Utc>,
    pub algorithm_version: String,
}

impl SimilarityEdge {
    /// Build the canonical edge for a pair. Returns `None` for a self-pair.
    pub fn canonical(a: Uuid, b: Uuid, score: f64, computed_at: DateTime<Utc>) -> Option<Self> {
        if a == b {
            return None;
        }
        let (problem_a_id, problem_b_id) = if a < b { (a, b) } else { (b, a) };
        Some(Self {
            problem_a_id,
            problem_b_id,
            similarity_score: clamp_unit(score),
            method: SIMILARITY_METHOD.to_string(),
            computed_at,
            algorithm_version: SIMILARITY_ALGORITHM_VERSION.to_string(),
        })
    }

    /// The id on the other side of the edge from `id`, if `id` is an endpoint.
    pub fn other(&self, id: Uuid) -> Option<Uuid> {
        if self.problem_a_id == id {
            Some(self.problem_b_id)
        } else if self.problem_b_id == id {
            Some(self.problem_a_id)
        } else {
            None
        }
    }
}

/// A stored edge seen from one problem's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarProblem {
    pub problem_id: Uuid,
    pub similarity_score: f64,
    pub computed_at: DateTime<Utc>,
}

// --- Clusters ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub primary_theme: Option<String>,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ClusterStatus,
    pub problem_count: i32,
    pub avg_severity: Option<f64>,
    #[sqlx(try_from = "String")]
    pub created_by: Origin,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn is_active(&self) -> bool {
        self.status == ClusterStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCluster {
    pub name: String,
    pub slug: String,
    pub primary_theme: Option<String>,
    pub description: Option<String>,
    pub created_by: Origin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClusterMembership {
    pub cluster_id: Uuid,
    pub problem_id: Uuid,
    pub membership_score: f64,
    pub is_centroid: bool,
    #[sqlx(try_from = "String")]
    pub added_by: Origin,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMembership {
    pub cluster_id: Uuid,
    pub problem_id: Uuid,
    pub membership_score: f64,
    pub is_centroid: bool,
    pub added_by: Origin,
}

impl NewMembership {
    pub fn auto(cluster_id: Uuid, problem_id: Uuid, membership_score: f64) -> Self {
        Self {
            cluster_id,
            problem_id,
            membership_score: clamp_unit(membership_score),
            is_centroid: false,
            added_by: Origin::Auto,
        }
    }

    pub fn manual(
        cluster_id: Uuid,
        problem_id: Uuid,
        membership_score: f64,
        is_centroid: bool,
    ) -> Self {
        Self {
            cluster_id,
            problem_id,
            membership_score: clamp_unit(membership_score),
            is_centroid,
            added_by: Origin::Manual,
        }
    }
}

/// A cluster member with its problem, as returned by member queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub problem: ProblemRecord,
    pub membership_score: f64,
    pub is_centroid: bool,
    pub added_by: Origin,
}

/// Clamp into [0, 1]. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_edge_orders_ids() {
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let now = Utc::now();
        let edge = SimilarityEdge::canonical(a, b, 0.4, now).unwrap();
        assert_eq!(edge.problem_a_id, b);
        assert_eq!(edge.problem_b_id, a);
        assert_eq!(edge, SimilarityEdge::canonical(b, a, 0.4, now).unwrap());
    }

    #[test]
    fn canonical_edge_rejects_self_pair() {
        let a = Uuid::new_v4();
        assert!(SimilarityEdge::canonical(a, a, 1.0, Utc::now()).is_none());
    }

    #[test]
    fn canonical_edge_clamps_score() {
        let edge =
            SimilarityEdge::canonical(Uuid::from_u128(1), Uuid::from_u128(2), 1.7, Utc::now())
                .unwrap();
        assert_eq!(edge.similarity_score, 1.0);
    }

    #[test]
    fn edge_other_side() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let edge = SimilarityEdge::canonical(a, b, 0.5, Utc::now()).unwrap();
        assert_eq!(edge.other(a), Some(b));
        assert_eq!(edge.other(b), Some(a));
        assert_eq!(edge.other(Uuid::from_u128(3)), None);
    }

    #[test]
    fn truncate_title_keeps_short_titles() {
        assert_eq!(truncate_title("Short"), "Short");
        let exact = "x".repeat(MAX_TITLE_CHARS);
        assert_eq!(truncate_title(&exact), exact);
    }

    #[test]
    fn truncate_title_cuts_with_ellipsis() {
        let long = "é".repeat(500);
        let cut = truncate_title(&long);
        assert_eq!(cut.chars().count(), MAX_TITLE_CHARS);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn enum_text_round_trip() {
        for status in [
            ValidationStatus::Unvalidated,
            ValidationStatus::UserTested,
            ValidationStatus::DesperateUserConfirmed,
            ValidationStatus::MarketValidated,
        ] {
            assert_eq!(status.as_str().parse::<ValidationStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ClusterStatus>().is_ok());
        assert!("deleted".parse::<ClusterStatus>().is_err());
    }

    #[test]
    fn new_problem_validation() {
        let base = NewProblem::builder()
            .title("Clinic queues")
            .problem_statement("Patients wait hours")
            .submitted_by(Uuid::new_v4())
            .build();
        assert!(base.validate().is_ok());

        let mut bad = base.clone();
        bad.severity_rating = Some(11);
        assert!(matches!(bad.validate(), Err(ProblemBankError::Validation(_))));

        let mut bad = base.clone();
        bad.desperate_user_score = Some(6);
        assert!(bad.validate().is_err());

        let mut bad = base;
        bad.title = "y".repeat(MAX_TITLE_CHARS + 1);
        assert!(bad.validate().is_err());
    }
}
