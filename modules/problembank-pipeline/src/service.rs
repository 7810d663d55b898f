use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use problembank_common::{
    Cluster, ClusterMember, Evidence, ProblemBankError, ProblemRecord, Result, SimilarProblem,
};
use problembank_store::{CycleSource, ProblemStore};

use crate::clustering::{ClusterBuilder, CreateClusterRequest};
use crate::extractor::{ExtractionOutcome, Extractor};
use crate::similarity::{SimilarityEngine, SimilarityReport, SimilarityRequest};

/// Members attached to a cluster listing or detail view.
pub const TOP_MEMBERS: i64 = 10;
pub const DEFAULT_SIMILAR_LIMIT: i64 = 10;
const MAX_SIMILAR_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListClustersQuery {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub include_problems: bool,
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterListing {
    #[serde(flatten)]
    pub cluster: Cluster,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problems: Option<Vec<ClusterMember>>,
    /// Distinct institutions of the attached members, in member order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institutions: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDetail {
    #[serde(flatten)]
    pub cluster: Cluster,
    pub problems: Vec<ClusterMember>,
}

/// Facade over extraction, similarity, clustering and the read queries.
/// Cheap to clone; every handle is shared.
#[derive(Clone)]
pub struct ProblemBank {
    store: Arc<dyn ProblemStore>,
    extractor: Arc<Extractor>,
    similarity: Arc<SimilarityEngine>,
    clusters: ClusterBuilder,
}

impl ProblemBank {
    pub fn new(store: Arc<dyn ProblemStore>, cycles: Arc<dyn CycleSource>) -> Self {
        let clusters = ClusterBuilder::new(store.clone());
        Self {
            extractor: Arc::new(Extractor::new(store.clone(), cycles)),
            similarity: Arc::new(SimilarityEngine::new(store.clone(), clusters.clone())),
            clusters,
            store,
        }
    }

    // --- Pipeline ---

    pub async fn extract(&self, cycle_id: Uuid) -> Result<ExtractionOutcome> {
        self.extractor.extract(cycle_id).await
    }

    pub async fn compute_similarities(&self, request: &SimilarityRequest) -> Result<SimilarityReport> {
        self.similarity.compute(request).await
    }

    pub async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<Cluster> {
        self.clusters.create_manual(request).await
    }

    pub async fn archive_cluster(&self, cluster_id: Uuid) -> Result<Cluster> {
        self.clusters.archive(cluster_id).await
    }

    pub async fn refresh_cluster_stats(&self, cluster_id: Uuid) -> Result<Cluster> {
        self.clusters.refresh_stats(cluster_id).await
    }

    // --- Queries ---

    pub async fn list_clusters(&self, query: &ListClustersQuery) -> Result<Vec<ClusterListing>> {
        let clusters = self
            .store
            .list_clusters(query.theme.as_deref(), query.include_archived)
            .await?;

        let mut listings = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let listing = if query.include_problems {
                let members = self.store.cluster_members(cluster.id, TOP_MEMBERS).await?;
                ClusterListing {
                    institutions: Some(distinct_institutions(&members)),
                    problems: Some(members),
                    cluster,
                }
            } else {
                ClusterListing {
                    cluster,
                    problems: None,
                    institutions: None,
                }
            };
            listings.push(listing);
        }
        Ok(listings)
    }

    pub async fn get_cluster(&self, cluster_id: Uuid) -> Result<ClusterDetail> {
        let cluster = self
            .store
            .get_cluster(cluster_id)
            .await?
            .ok_or_else(|| ProblemBankError::cluster_not_found(cluster_id))?;
        let problems = self.store.cluster_members(cluster_id, TOP_MEMBERS).await?;
        Ok(ClusterDetail { cluster, problems })
    }

    /// Stored neighbours of a problem, highest score first.
    pub async fn similar_problems(&self, problem_id: Uuid, limit: i64) -> Result<Vec<SimilarProblem>> {
        self.require_problem(problem_id).await?;
        let limit = limit.clamp(1, MAX_SIMILAR_LIMIT);
        let edges = self.store.edges_for_problem(problem_id, limit).await?;
        Ok(edges
            .into_iter()
            .filter_map(|edge| {
                Some(SimilarProblem {
                    problem_id: edge.other(problem_id)?,
                    similarity_score: edge.similarity_score,
                    computed_at: edge.computed_at,
                })
            })
            .collect())
    }

    pub async fn get_problem(&self, problem_id: Uuid) -> Result<ProblemRecord> {
        self.require_problem(problem_id).await
    }

    pub async fn list_open_problems(&self, theme: Option<&str>) -> Result<Vec<ProblemRecord>> {
        self.store.open_problems(theme).await
    }

    pub async fn problem_evidence(&self, problem_id: Uuid) -> Result<Vec<Evidence>> {
        self.require_problem(problem_id).await?;
        self.store.evidence_for_problem(problem_id).await
    }

    async fn require_problem(&self, problem_id: Uuid) -> Result<ProblemRecord> {
        self.store
            .get_problem(problem_id)
            .await?
            .ok_or_else(|| ProblemBankError::problem_not_found(problem_id))
    }
}

fn distinct_institutions(members: &[ClusterMember]) -> Vec<Uuid> {
    let mut institutions = Vec::new();
    for id in members.iter().filter_map(|m| m.problem.institution_id) {
        if !institutions.contains(&id) {
            institutions.push(id);
        }
    }
    institutions
}
