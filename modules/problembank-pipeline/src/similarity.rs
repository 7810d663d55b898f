//! Pairwise similarity between open problems.
//!
//! Score = 0.5 · Jaccard(word sets) + 0.5 · theme match, where a theme match
//! is worth 0.5 on its own. Pairs at or above the threshold are stored as
//! canonical edges (smaller id first).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use problembank_common::config::DEFAULT_SIMILARITY_THRESHOLD;
use problembank_common::{
    clamp_unit, ProblemBankError, ProblemRecord, Result, SimilarityEdge,
};
use problembank_store::ProblemStore;

use crate::clustering::ClusterBuilder;

/// Only words longer than this many characters count toward text overlap.
const MIN_WORD_CHARS: usize = 3;
const THEME_MATCH: f64 = 0.5;
const TEXT_WEIGHT: f64 = 0.5;
const THEME_WEIGHT: f64 = 0.5;

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRequest {
    #[serde(default)]
    pub problem_id: Option<Uuid>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub recompute_all: bool,
}

fn default_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

impl Default for SimilarityRequest {
    fn default() -> Self {
        Self {
            problem_id: None,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            recompute_all: false,
        }
    }
}

impl SimilarityRequest {
    /// Full pass over every open pair, followed by theme clustering.
    pub fn recompute_all(threshold: f64) -> Self {
        Self {
            problem_id: None,
            threshold,
            recompute_all: true,
        }
    }

    /// Score one problem against every other open problem.
    pub fn for_problem(problem_id: Uuid, threshold: f64) -> Self {
        Self {
            problem_id: Some(problem_id),
            threshold,
            recompute_all: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ProblemBankError::Validation(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    fn target(&self) -> Option<Uuid> {
        if self.recompute_all {
            None
        } else {
            self.problem_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    pub problem_count: usize,
    pub similarities_computed: u64,
    pub clusters_updated: usize,
    pub threshold: f64,
}

impl SimilarityReport {
    fn empty(problem_count: usize, threshold: f64) -> Self {
        Self {
            problem_count,
            similarities_computed: 0,
            clusters_updated: 0,
            threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// A problem prepared once for repeated pair scoring.
#[derive(Debug, Clone)]
pub struct ScoringProfile {
    pub id: Uuid,
    pub theme: Option<String>,
    pub words: HashSet<String>,
}

impl ScoringProfile {
    pub fn from_problem(problem: &ProblemRecord) -> Self {
        Self {
            id: problem.id,
            theme: problem.theme.clone(),
            words: word_set(&problem.search_text()),
        }
    }
}

/// Lowercased words longer than three characters, punctuation removed.
pub fn word_set(text: &str) -> HashSet<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > MIN_WORD_CHARS)
        .map(str::to_string)
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

pub fn score_pair(a: &ScoringProfile, b: &ScoringProfile) -> f64 {
    let theme = match (&a.theme, &b.theme) {
        (Some(x), Some(y)) if x == y => THEME_MATCH,
        _ => 0.0,
    };
    if a.words.is_empty() || b.words.is_empty() {
        return theme;
    }
    clamp_unit(TEXT_WEIGHT * jaccard(&a.words, &b.words) + THEME_WEIGHT * theme)
}

/// Every unordered pair once, keeping those at or above `threshold`.
pub fn full_pass(
    profiles: &[ScoringProfile],
    threshold: f64,
    computed_at: DateTime<Utc>,
) -> Vec<SimilarityEdge> {
    let mut edges = Vec::new();
    for source in profiles {
        for other in profiles {
            if source.id >= other.id {
                continue;
            }
            let score = score_pair(source, other);
            if score >= threshold {
                edges.extend(SimilarityEdge::canonical(source.id, other.id, score, computed_at));
            }
        }
    }
    edges
}

/// The target against every other profile.
pub fn target_pass(
    target: &ScoringProfile,
    others: &[ScoringProfile],
    threshold: f64,
    computed_at: DateTime<Utc>,
) -> Vec<SimilarityEdge> {
    others
        .iter()
        .filter(|other| other.id != target.id)
        .filter_map(|other| {
            let score = score_pair(target, other);
            (score >= threshold)
                .then(|| SimilarityEdge::canonical(target.id, other.id, score, computed_at))
                .flatten()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// SimilarityEngine
// ---------------------------------------------------------------------------

pub struct SimilarityEngine {
    store: Arc<dyn ProblemStore>,
    clusters: ClusterBuilder,
}

impl SimilarityEngine {
    pub fn new(store: Arc<dyn ProblemStore>, clusters: ClusterBuilder) -> Self {
        Self { store, clusters }
    }

    pub async fn compute(&self, request: &SimilarityRequest) -> Result<SimilarityReport> {
        request.validate()?;
        let threshold = request.threshold;
        let open = self.store.open_problems(None).await?;

        let (problem_count, edges) = match request.target() {
            Some(target_id) => {
                let target = self
                    .store
                    .get_problem(target_id)
                    .await?
                    .ok_or_else(|| ProblemBankError::problem_not_found(target_id))?;
                let others: Vec<ScoringProfile> = open
                    .iter()
                    .filter(|p| p.id != target_id)
                    .map(ScoringProfile::from_problem)
                    .collect();
                let problem_count = others.len() + 1;
                if others.is_empty() {
                    debug!(problem_id = %target_id, "No other open problems to compare");
                    return Ok(SimilarityReport::empty(problem_count, threshold));
                }

                let target = ScoringProfile::from_problem(&target);
                let edges = tokio::task::spawn_blocking(move || {
                    target_pass(&target, &others, threshold, Utc::now())
                })
                .await
                .map_err(anyhow::Error::from)?;
                (problem_count, edges)
            }
            None => {
                let problem_count = open.len();
                if problem_count < 2 {
                    debug!(problem_count, "Not enough open problems to compare");
                    return Ok(SimilarityReport::empty(problem_count, threshold));
                }

                let profiles: Vec<ScoringProfile> =
                    open.iter().map(ScoringProfile::from_problem).collect();
                let edges =
                    tokio::task::spawn_blocking(move || full_pass(&profiles, threshold, Utc::now()))
                        .await
                        .map_err(anyhow::Error::from)?;
                (problem_count, edges)
            }
        };

        let similarities_computed = if edges.is_empty() {
            0
        } else {
            self.store.upsert_edges(&edges).await?
        };

        let clusters_updated = if request.recompute_all {
            self.clusters.rebuild_theme_clusters().await?
        } else {
            0
        };

        info!(
            problem_count,
            similarities_computed,
            clusters_updated,
            threshold,
            target = ?request.target(),
            "Similarity pass complete"
        );

        Ok(SimilarityReport {
            problem_count,
            similarities_computed,
            clusters_updated,
            threshold,
        })
    }
}
