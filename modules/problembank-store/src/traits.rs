// Trait abstractions for problem bank persistence.
//
// ProblemStore covers everything the pipeline writes: problems, evidence,
// similarity edges, clusters and memberships. CycleSource covers the
// read-only cycle data owned by the rest of the application.

use async_trait::async_trait;
use uuid::Uuid;

use problembank_common::{
    Cluster, ClusterMember, CycleAggregate, Evidence, NewCluster, NewEvidence, NewMembership,
    NewProblem, ProblemRecord, Result, SimilarityEdge,
};

// ---------------------------------------------------------------------------
// ProblemStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProblemStore: Send + Sync {
    // --- Problems ---

    /// Id of the problem already extracted from this cycle, if any.
    async fn problem_id_for_cycle(&self, cycle_id: Uuid) -> Result<Option<Uuid>>;

    /// Insert a problem. A second insert for the same `source_cycle_id` fails
    /// with `DuplicateExtraction` carrying the first problem's id.
    async fn insert_problem(&self, problem: &NewProblem) -> Result<ProblemRecord>;

    async fn get_problem(&self, id: Uuid) -> Result<Option<ProblemRecord>>;

    /// Fetch several problems. Missing ids are silently absent from the result.
    async fn get_problems(&self, ids: &[Uuid]) -> Result<Vec<ProblemRecord>>;

    /// All open problems, optionally restricted to one theme, oldest first.
    async fn open_problems(&self, theme: Option<&str>) -> Result<Vec<ProblemRecord>>;

    // --- Evidence ---

    async fn insert_evidence(&self, evidence: &NewEvidence) -> Result<Evidence>;

    async fn evidence_for_problem(&self, problem_id: Uuid) -> Result<Vec<Evidence>>;

    // --- Similarity ---

    /// Upsert canonical edges, overwriting score/method/timestamp/version on
    /// conflict. Returns the number of edges written.
    async fn upsert_edges(&self, edges: &[SimilarityEdge]) -> Result<u64>;

    /// Edges touching a problem, highest score first.
    async fn edges_for_problem(&self, problem_id: Uuid, limit: i64) -> Result<Vec<SimilarityEdge>>;

    // --- Clusters ---

    /// Insert or refresh an auto-created cluster keyed by slug. Returns `None`
    /// when the slug belongs to a manually created cluster, which is left alone.
    async fn upsert_cluster_by_slug(&self, cluster: &NewCluster) -> Result<Option<Cluster>>;

    /// Insert a new cluster. Fails with `DuplicateSlug` if the slug is taken.
    async fn insert_cluster(&self, cluster: &NewCluster) -> Result<Cluster>;

    async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>>;

    /// Clusters ordered by problem_count descending, then name.
    async fn list_clusters(&self, theme: Option<&str>, include_archived: bool)
        -> Result<Vec<Cluster>>;

    /// Move a cluster to `archived`. Returns `None` if it does not exist.
    async fn archive_cluster(&self, id: Uuid) -> Result<Option<Cluster>>;

    /// Upsert memberships on (cluster_id, problem_id). Auto memberships never
    /// overwrite manual ones. Returns the number of rows inserted or updated.
    async fn upsert_memberships(&self, memberships: &[NewMembership]) -> Result<u64>;

    /// Members by membership_score descending, centroid first on ties.
    async fn cluster_members(&self, cluster_id: Uuid, limit: i64) -> Result<Vec<ClusterMember>>;

    /// Recompute problem_count and avg_severity from current memberships.
    async fn refresh_cluster_stats(&self, cluster_id: Uuid) -> Result<Option<Cluster>>;
}

// ---------------------------------------------------------------------------
// CycleSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CycleSource: Send + Sync {
    /// Load a cycle with whichever sub-records exist.
    async fn load_cycle(&self, cycle_id: Uuid) -> Result<Option<CycleAggregate>>;

    /// Resolve a user to their institution.
    async fn institution_for_user(&self, user_id: Uuid) -> Result<Option<Uuid>>;
}
