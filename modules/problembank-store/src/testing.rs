// In-memory test doubles for the problem bank.
//
// Two doubles matching the two trait boundaries:
// - MemoryStore (ProblemStore): stateful in-memory tables with the same
//   uniqueness and upsert rules as the Postgres schema
// - MemoryCycleSource (CycleSource): HashMap-based cycle fixtures
//
// Plus builders for cycle fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use problembank_common::{
    Cluster, ClusterMember, ClusterMembership, ClusterStatus, CycleAggregate, CycleContext,
    CycleProblem, Evidence, ImpactAssessment, NewCluster, NewEvidence,
    NewMembership, NewProblem, Origin, ProblemBankError, ProblemRecord, Result, SimilarityEdge,
    ValueAssessment,
};

use crate::traits::{CycleSource, ProblemStore};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStoreInner {
    /// Insertion order doubles as created_at order.
    problems: Vec<ProblemRecord>,
    evidence: Vec<Evidence>,
    edges: HashMap<(Uuid, Uuid), SimilarityEdge>,
    clusters: Vec<Cluster>,
    memberships: Vec<ClusterMembership>,
}

/// Stateful in-memory `ProblemStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
    fail_evidence: AtomicBool,
    edge_upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent evidence insert fail.
    pub fn fail_evidence_writes(&self) {
        self.fail_evidence.store(true, Ordering::SeqCst);
    }

    /// Number of `upsert_edges` calls made so far.
    pub fn edge_upsert_calls(&self) -> usize {
        self.edge_upsert_calls.load(Ordering::SeqCst)
    }

    pub fn problem_count(&self) -> usize {
        self.inner.lock().unwrap().problems.len()
    }

    pub fn all_edges(&self) -> Vec<SimilarityEdge> {
        let mut edges: Vec<_> = self.inner.lock().unwrap().edges.values().cloned().collect();
        edges.sort_by_key(|e| (e.problem_a_id, e.problem_b_id));
        edges
    }

    pub fn all_clusters(&self) -> Vec<Cluster> {
        self.inner.lock().unwrap().clusters.clone()
    }

    pub fn memberships_for(&self, cluster_id: Uuid) -> Vec<ClusterMembership> {
        self.inner
            .lock()
            .unwrap()
            .memberships
            .iter()
            .filter(|m| m.cluster_id == cluster_id)
            .cloned()
            .collect()
    }

    /// Overwrite a stored problem, e.g. to mark it solved or change its text.
    pub fn replace_problem(&self, problem: ProblemRecord) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.problems.iter_mut().find(|p| p.id == problem.id) {
            *slot = problem;
        }
    }
}

fn recompute_stats(inner: &mut MemoryStoreInner, cluster_id: Uuid) -> Option<Cluster> {
    let severities: Vec<Option<i16>> = inner
        .memberships
        .iter()
        .filter(|m| m.cluster_id == cluster_id)
        .map(|m| {
            inner
                .problems
                .iter()
                .find(|p| p.id == m.problem_id)
                .and_then(|p| p.severity_rating)
        })
        .collect();
    let rated: Vec<f64> = severities.iter().flatten().map(|s| f64::from(*s)).collect();
    let avg = if rated.is_empty() {
        None
    } else {
        Some(rated.iter().sum::<f64>() / rated.len() as f64)
    };

    let cluster = inner.clusters.iter_mut().find(|c| c.id == cluster_id)?;
    cluster.problem_count = severities.len() as i32;
    cluster.avg_severity = avg;
    cluster.updated_at = Utc::now();
    Some(cluster.clone())
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn problem_id_for_cycle(&self, cycle_id: Uuid) -> Result<Option<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .problems
            .iter()
            .find(|p| p.source_cycle_id == Some(cycle_id))
            .map(|p| p.id))
    }

    async fn insert_problem(&self, problem: &NewProblem) -> Result<ProblemRecord> {
        problem.validate()?;
        let mut inner = self.inner.lock().unwrap();

        if let Some(cycle_id) = problem.source_cycle_id {
            if let Some(existing) = inner
                .problems
                .iter()
                .find(|p| p.source_cycle_id == Some(cycle_id))
            {
                return Err(ProblemBankError::DuplicateExtraction {
                    cycle_id,
                    problem_id: existing.id,
                });
            }
        }

        let now = Utc::now();
        let record = ProblemRecord {
            id: Uuid::new_v4(),
            title: problem.title.clone(),
            problem_statement: problem.problem_statement.clone(),
            theme: problem.theme.clone(),
            who_affected: problem.who_affected.clone(),
            when_occurs: problem.when_occurs.clone(),
            where_occurs: problem.where_occurs.clone(),
            frequency: problem.frequency.clone(),
            severity_rating: problem.severity_rating,
            validation_status: problem.validation_status,
            desperate_user_score: problem.desperate_user_score,
            status: problem.status,
            is_open_for_attempts: problem.is_open_for_attempts,
            source_cycle_id: problem.source_cycle_id,
            submitted_by: problem.submitted_by,
            institution_id: problem.institution_id,
            metadata: problem.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.problems.push(record.clone());
        Ok(record)
    }

    async fn get_problem(&self, id: Uuid) -> Result<Option<ProblemRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.problems.iter().find(|p| p.id == id).cloned())
    }

    async fn get_problems(&self, ids: &[Uuid]) -> Result<Vec<ProblemRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .problems
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn open_problems(&self, theme: Option<&str>) -> Result<Vec<ProblemRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .problems
            .iter()
            .filter(|p| p.is_open())
            .filter(|p| theme.is_none() || p.theme.as_deref() == theme)
            .cloned()
            .collect())
    }

    async fn insert_evidence(&self, evidence: &NewEvidence) -> Result<Evidence> {
        if self.fail_evidence.load(Ordering::SeqCst) {
            return Err(ProblemBankError::Other(anyhow::anyhow!(
                "MemoryStore: evidence writes disabled"
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        let row = Evidence {
            id: Uuid::new_v4(),
            problem_id: evidence.problem_id,
            content: evidence.content.clone(),
            source_name: evidence.source_name.clone(),
            source_role: evidence.source_role.clone(),
            pain_level: evidence.pain_level,
            collected_at: evidence.collected_at,
            created_at: Utc::now(),
        };
        inner.evidence.push(row.clone());
        Ok(row)
    }

    async fn evidence_for_problem(&self, problem_id: Uuid) -> Result<Vec<Evidence>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .evidence
            .iter()
            .filter(|e| e.problem_id == problem_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.collected_at);
        Ok(rows)
    }

    async fn upsert_edges(&self, edges: &[SimilarityEdge]) -> Result<u64> {
        self.edge_upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        for edge in edges {
            if edge.problem_a_id >= edge.problem_b_id {
                return Err(ProblemBankError::Validation(format!(
                    "non-canonical edge ({}, {})",
                    edge.problem_a_id, edge.problem_b_id
                )));
            }
            inner
                .edges
                .insert((edge.problem_a_id, edge.problem_b_id), edge.clone());
        }
        Ok(edges.len() as u64)
    }

    async fn edges_for_problem(&self, problem_id: Uuid, limit: i64) -> Result<Vec<SimilarityEdge>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .edges
            .values()
            .filter(|e| e.problem_a_id == problem_id || e.problem_b_id == problem_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn upsert_cluster_by_slug(&self, cluster: &NewCluster) -> Result<Option<Cluster>> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        if let Some(existing) = inner.clusters.iter_mut().find(|c| c.slug == cluster.slug) {
            if existing.created_by != Origin::Auto {
                return Ok(None);
            }
            existing.name = cluster.name.clone();
            existing.primary_theme = cluster.primary_theme.clone();
            if existing.description.is_none() {
                existing.description = cluster.description.clone();
            }
            existing.updated_at = now;
            return Ok(Some(existing.clone()));
        }

        let row = new_cluster_row(cluster);
        inner.clusters.push(row.clone());
        Ok(Some(row))
    }

    async fn insert_cluster(&self, cluster: &NewCluster) -> Result<Cluster> {
        let mut inner = self.inner.lock().unwrap();
        if inner.clusters.iter().any(|c| c.slug == cluster.slug) {
            return Err(ProblemBankError::DuplicateSlug(cluster.slug.clone()));
        }
        let row = new_cluster_row(cluster);
        inner.clusters.push(row.clone());
        Ok(row)
    }

    async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.clusters.iter().find(|c| c.id == id).cloned())
    }

    async fn list_clusters(
        &self,
        theme: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<Cluster>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .clusters
            .iter()
            .filter(|c| include_archived || c.is_active())
            .filter(|c| theme.is_none() || c.primary_theme.as_deref() == theme)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.problem_count
                .cmp(&a.problem_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(rows)
    }

    async fn archive_cluster(&self, id: Uuid) -> Result<Option<Cluster>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(cluster) = inner.clusters.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if cluster.status != ClusterStatus::Archived {
            cluster.status = ClusterStatus::Archived;
            cluster.updated_at = Utc::now();
        }
        Ok(Some(cluster.clone()))
    }

    async fn upsert_memberships(&self, memberships: &[NewMembership]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut written = 0;
        for m in memberships {
            let existing = inner
                .memberships
                .iter_mut()
                .find(|e| e.cluster_id == m.cluster_id && e.problem_id == m.problem_id);
            match existing {
                Some(row) => {
                    if row.added_by == Origin::Auto
                        || m.added_by == Origin::Manual
                    {
                        row.membership_score = m.membership_score;
                        row.is_centroid = m.is_centroid;
                        row.added_by = m.added_by;
                        written += 1;
                    }
                }
                None => {
                    if m.is_centroid
                        && inner
                            .memberships
                            .iter()
                            .any(|e| e.cluster_id == m.cluster_id && e.is_centroid)
                    {
                        return Err(ProblemBankError::Validation(format!(
                            "cluster {} already has a centroid",
                            m.cluster_id
                        )));
                    }
                    inner.memberships.push(ClusterMembership {
                        cluster_id: m.cluster_id,
                        problem_id: m.problem_id,
                        membership_score: m.membership_score,
                        is_centroid: m.is_centroid,
                        added_by: m.added_by,
                        added_at: Utc::now(),
                    });
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn cluster_members(&self, cluster_id: Uuid, limit: i64) -> Result<Vec<ClusterMember>> {
        let inner = self.inner.lock().unwrap();
        let mut members: Vec<ClusterMember> = inner
            .memberships
            .iter()
            .filter(|m| m.cluster_id == cluster_id)
            .filter_map(|m| {
                let problem = inner.problems.iter().find(|p| p.id == m.problem_id)?;
                Some(ClusterMember {
                    problem: problem.clone(),
                    membership_score: m.membership_score,
                    is_centroid: m.is_centroid,
                    added_by: m.added_by,
                })
            })
            .collect();
        // Stable sort keeps insertion order as the final tie-break.
        members.sort_by(|a, b| {
            b.membership_score
                .total_cmp(&a.membership_score)
                .then_with(|| b.is_centroid.cmp(&a.is_centroid))
        });
        members.truncate(limit.max(0) as usize);
        Ok(members)
    }

    async fn refresh_cluster_stats(&self, cluster_id: Uuid) -> Result<Option<Cluster>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(recompute_stats(&mut inner, cluster_id))
    }
}

fn new_cluster_row(cluster: &NewCluster) -> Cluster {
    let now = Utc::now();
    Cluster {
        id: Uuid::new_v4(),
        name: cluster.name.clone(),
        slug: cluster.slug.clone(),
        primary_theme: cluster.primary_theme.clone(),
        description: cluster.description.clone(),
        status: ClusterStatus::Active,
        problem_count: 0,
        avg_severity: None,
        created_by: cluster.created_by,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// MemoryCycleSource
// ---------------------------------------------------------------------------

/// HashMap-based cycle fixtures. Unknown cycles load as `None`.
#[derive(Default)]
pub struct MemoryCycleSource {
    cycles: Mutex<HashMap<Uuid, CycleAggregate>>,
    institutions: Mutex<HashMap<Uuid, Uuid>>,
}

impl MemoryCycleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cycle(&self, cycle: CycleAggregate) {
        self.cycles.lock().unwrap().insert(cycle.id, cycle);
    }

    pub fn add_user(&self, user_id: Uuid, institution_id: Uuid) {
        self.institutions
            .lock()
            .unwrap()
            .insert(user_id, institution_id);
    }
}

#[async_trait]
impl CycleSource for MemoryCycleSource {
    async fn load_cycle(&self, cycle_id: Uuid) -> Result<Option<CycleAggregate>> {
        Ok(self.cycles.lock().unwrap().get(&cycle_id).cloned())
    }

    async fn institution_for_user(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self.institutions.lock().unwrap().get(&user_id).copied())
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

/// Builder for cycle fixtures: `cycle().raw_question("...").build()`.
pub fn cycle() -> CycleBuilder {
    CycleBuilder {
        aggregate: CycleAggregate {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ..Default::default()
        },
    }
}

pub struct CycleBuilder {
    aggregate: CycleAggregate,
}

impl CycleBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.aggregate.name = Some(name.to_string());
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.aggregate.user_id = user_id;
        self
    }

    pub fn problem(mut self, problem: CycleProblem) -> Self {
        self.aggregate.problem = Some(problem);
        self
    }

    pub fn raw_question(mut self, question: &str) -> Self {
        let problem = self.aggregate.problem.get_or_insert_with(Default::default);
        problem.raw_question = Some(question.to_string());
        self
    }

    pub fn refined_statement(mut self, statement: &str) -> Self {
        let problem = self.aggregate.problem.get_or_insert_with(Default::default);
        problem.refined_statement = Some(statement.to_string());
        self
    }

    pub fn context(mut self, context: CycleContext) -> Self {
        self.aggregate.context = Some(context);
        self
    }

    pub fn value_assessment(mut self, value: ValueAssessment) -> Self {
        self.aggregate.value_assessment = Some(value);
        self
    }

    pub fn impact_assessment(mut self, impact: ImpactAssessment) -> Self {
        self.aggregate.impact_assessment = Some(impact);
        self
    }

    pub fn build(self) -> CycleAggregate {
        self.aggregate
    }
}

/// An open problem ready for insertion, with the given theme and statement.
pub fn open_problem(title: &str, statement: &str, theme: Option<&str>) -> NewProblem {
    NewProblem::builder()
        .title(title)
        .problem_statement(statement)
        .theme(theme.map(str::to_string))
        .submitted_by(Uuid::new_v4())
        .build()
}
