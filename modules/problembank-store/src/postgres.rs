// Postgres implementation of ProblemStore and CycleSource.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use problembank_common::{
    Cluster, ClusterMember, CycleAggregate, CycleContext, CycleProblem, Evidence,
    ImpactAssessment, NewCluster, NewEvidence, NewMembership, NewProblem, Origin,
    ProblemBankError, ProblemRecord, Result, SimilarityEdge, ValueAssessment,
};

use crate::traits::{CycleSource, ProblemStore};

/// Rows per multi-row INSERT. Keeps bind parameters well under the protocol limit.
const UPSERT_BATCH: usize = 500;

const SOURCE_CYCLE_INDEX: &str = "problems_source_cycle_id_key";
const CLUSTER_SLUG_INDEX: &str = "problem_clusters_slug_key";

#[derive(Clone)]
pub struct PgProblemStore {
    pool: PgPool,
}

impl PgProblemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProblemBankError::Other(e.into()))?;
        Ok(())
    }
}

/// Name of the unique constraint a write violated, if that is why it failed.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    membership_score: f64,
    is_centroid: bool,
    #[sqlx(try_from = "String")]
    added_by: Origin,
    #[sqlx(flatten)]
    problem: ProblemRecord,
}

#[derive(sqlx::FromRow)]
struct CycleRow {
    id: Uuid,
    name: Option<String>,
    user_id: Uuid,
}

// ---------------------------------------------------------------------------
// ProblemStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ProblemStore for PgProblemStore {
    async fn problem_id_for_cycle(&self, cycle_id: Uuid) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM problems WHERE source_cycle_id = $1")
            .bind(cycle_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_problem(&self, problem: &NewProblem) -> Result<ProblemRecord> {
        problem.validate()?;

        let result = sqlx::query_as::<_, ProblemRecord>(
            r#"
            INSERT INTO problems
                (title, problem_statement, theme, who_affected, when_occurs, where_occurs,
                 frequency, severity_rating, validation_status, desperate_user_score, status,
                 is_open_for_attempts, source_cycle_id, submitted_by, institution_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(&problem.title)
        .bind(&problem.problem_statement)
        .bind(&problem.theme)
        .bind(&problem.who_affected)
        .bind(&problem.when_occurs)
        .bind(&problem.where_occurs)
        .bind(&problem.frequency)
        .bind(problem.severity_rating)
        .bind(problem.validation_status.as_str())
        .bind(problem.desperate_user_score)
        .bind(problem.status.as_str())
        .bind(problem.is_open_for_attempts)
        .bind(problem.source_cycle_id)
        .bind(problem.submitted_by)
        .bind(problem.institution_id)
        .bind(&problem.metadata)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(e) => match (unique_violation(&e).as_deref(), problem.source_cycle_id) {
                (Some(SOURCE_CYCLE_INDEX), Some(cycle_id)) => {
                    // Lost a race with a concurrent extraction of the same cycle.
                    let existing = self.problem_id_for_cycle(cycle_id).await?;
                    match existing {
                        Some(problem_id) => Err(ProblemBankError::DuplicateExtraction {
                            cycle_id,
                            problem_id,
                        }),
                        None => Err(e.into()),
                    }
                }
                _ => Err(e.into()),
            },
        }
    }

    async fn get_problem(&self, id: Uuid) -> Result<Option<ProblemRecord>> {
        let row = sqlx::query_as::<_, ProblemRecord>("SELECT * FROM problems WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_problems(&self, ids: &[Uuid]) -> Result<Vec<ProblemRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ProblemRecord>(
            "SELECT * FROM problems WHERE id = ANY($1) ORDER BY created_at ASC",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn open_problems(&self, theme: Option<&str>) -> Result<Vec<ProblemRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM problems WHERE status = 'open' ");
        if let Some(theme) = theme {
            qb.push("AND theme = ");
            qb.push_bind(theme);
            qb.push(" ");
        }
        qb.push("ORDER BY created_at ASC, id ASC");

        let rows = qb
            .build_query_as::<ProblemRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_evidence(&self, evidence: &NewEvidence) -> Result<Evidence> {
        let row = sqlx::query_as::<_, Evidence>(
            r#"
            INSERT INTO problem_evidence
                (problem_id, content, source_name, source_role, pain_level, collected_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(evidence.problem_id)
        .bind(&evidence.content)
        .bind(&evidence.source_name)
        .bind(&evidence.source_role)
        .bind(evidence.pain_level)
        .bind(evidence.collected_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn evidence_for_problem(&self, problem_id: Uuid) -> Result<Vec<Evidence>> {
        let rows = sqlx::query_as::<_, Evidence>(
            "SELECT * FROM problem_evidence WHERE problem_id = $1 ORDER BY collected_at ASC",
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_edges(&self, edges: &[SimilarityEdge]) -> Result<u64> {
        let mut written = 0;
        for chunk in edges.chunks(UPSERT_BATCH) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO problem_similarities \
                 (problem_a_id, problem_b_id, similarity_score, method, computed_at, algorithm_version) ",
            );
            qb.push_values(chunk, |mut row, edge| {
                row.push_bind(edge.problem_a_id)
                    .push_bind(edge.problem_b_id)
                    .push_bind(edge.similarity_score)
                    .push_bind(edge.method.clone())
                    .push_bind(edge.computed_at)
                    .push_bind(edge.algorithm_version.clone());
            });
            qb.push(
                " ON CONFLICT (problem_a_id, problem_b_id) DO UPDATE SET \
                 similarity_score = EXCLUDED.similarity_score, \
                 method = EXCLUDED.method, \
                 computed_at = EXCLUDED.computed_at, \
                 algorithm_version = EXCLUDED.algorithm_version",
            );

            let result = qb.build().execute(&self.pool).await?;
            written += result.rows_affected();
        }
        debug!(edges = edges.len(), written, "Upserted similarity edges");
        Ok(written)
    }

    async fn edges_for_problem(&self, problem_id: Uuid, limit: i64) -> Result<Vec<SimilarityEdge>> {
        let rows = sqlx::query_as::<_, SimilarityEdge>(
            r#"
            SELECT * FROM problem_similarities
            WHERE problem_a_id = $1 OR problem_b_id = $1
            ORDER BY similarity_score DESC, computed_at DESC
            LIMIT $2
            "#,
        )
        .bind(problem_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_cluster_by_slug(&self, cluster: &NewCluster) -> Result<Option<Cluster>> {
        let row = sqlx::query_as::<_, Cluster>(
            r#"
            INSERT INTO problem_clusters (name, slug, primary_theme, description, created_by)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (slug) DO UPDATE
                SET name = EXCLUDED.name,
                    primary_theme = EXCLUDED.primary_theme,
                    description = COALESCE(problem_clusters.description, EXCLUDED.description),
                    updated_at = now()
                WHERE problem_clusters.created_by = 'auto'
            RETURNING *
            "#,
        )
        .bind(&cluster.name)
        .bind(&cluster.slug)
        .bind(&cluster.primary_theme)
        .bind(&cluster.description)
        .bind(cluster.created_by.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_cluster(&self, cluster: &NewCluster) -> Result<Cluster> {
        let result = sqlx::query_as::<_, Cluster>(
            r#"
            INSERT INTO problem_clusters (name, slug, primary_theme, description, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&cluster.name)
        .bind(&cluster.slug)
        .bind(&cluster.primary_theme)
        .bind(&cluster.description)
        .bind(cluster.created_by.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(e) if unique_violation(&e).as_deref() == Some(CLUSTER_SLUG_INDEX) => {
                Err(ProblemBankError::DuplicateSlug(cluster.slug.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>> {
        let row = sqlx::query_as::<_, Cluster>("SELECT * FROM problem_clusters WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_clusters(
        &self,
        theme: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<Cluster>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM problem_clusters WHERE true ");
        if !include_archived {
            qb.push("AND status = 'active' ");
        }
        if let Some(theme) = theme {
            qb.push("AND primary_theme = ");
            qb.push_bind(theme);
            qb.push(" ");
        }
        qb.push("ORDER BY problem_count DESC, name ASC");

        let rows = qb.build_query_as::<Cluster>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn archive_cluster(&self, id: Uuid) -> Result<Option<Cluster>> {
        let row = sqlx::query_as::<_, Cluster>(
            r#"
            UPDATE problem_clusters
            SET status = 'archived',
                updated_at = CASE WHEN status = 'archived' THEN updated_at ELSE now() END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_memberships(&self, memberships: &[NewMembership]) -> Result<u64> {
        let mut written = 0;
        for chunk in memberships.chunks(UPSERT_BATCH) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO cluster_memberships \
                 (cluster_id, problem_id, membership_score, is_centroid, added_by) ",
            );
            qb.push_values(chunk, |mut row, m| {
                row.push_bind(m.cluster_id)
                    .push_bind(m.problem_id)
                    .push_bind(m.membership_score)
                    .push_bind(m.is_centroid)
                    .push_bind(m.added_by.as_str());
            });
            qb.push(
                " ON CONFLICT (cluster_id, problem_id) DO UPDATE SET \
                 membership_score = EXCLUDED.membership_score, \
                 is_centroid = EXCLUDED.is_centroid, \
                 added_by = EXCLUDED.added_by \
                 WHERE cluster_memberships.added_by = 'auto' OR EXCLUDED.added_by = 'manual'",
            );

            let result = qb.build().execute(&self.pool).await?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    async fn cluster_members(&self, cluster_id: Uuid, limit: i64) -> Result<Vec<ClusterMember>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT m.membership_score, m.is_centroid, m.added_by, p.*
            FROM cluster_memberships m
            JOIN problems p ON p.id = m.problem_id
            WHERE m.cluster_id = $1
            ORDER BY m.membership_score DESC, m.is_centroid DESC, p.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cluster_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ClusterMember {
                problem: r.problem,
                membership_score: r.membership_score,
                is_centroid: r.is_centroid,
                added_by: r.added_by,
            })
            .collect())
    }

    async fn refresh_cluster_stats(&self, cluster_id: Uuid) -> Result<Option<Cluster>> {
        let row = sqlx::query_as::<_, Cluster>(
            r#"
            UPDATE problem_clusters c
            SET problem_count = s.member_count,
                avg_severity = s.avg_severity,
                updated_at = now()
            FROM (
                SELECT COUNT(*)::int AS member_count,
                       AVG(p.severity_rating)::float8 AS avg_severity
                FROM cluster_memberships m
                JOIN problems p ON p.id = m.problem_id
                WHERE m.cluster_id = $1
            ) s
            WHERE c.id = $1
            RETURNING c.*
            "#,
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// CycleSource
// ---------------------------------------------------------------------------

#[async_trait]
impl CycleSource for PgProblemStore {
    async fn load_cycle(&self, cycle_id: Uuid) -> Result<Option<CycleAggregate>> {
        let Some(cycle) =
            sqlx::query_as::<_, CycleRow>("SELECT id, name, user_id FROM cycles WHERE id = $1")
                .bind(cycle_id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let problem = sqlx::query_as::<_, CycleProblem>(
            r#"
            SELECT refined_statement, selected_question, raw_question,
                   what_is_the_problem, who_experiences_it, when_does_it_happen,
                   why_does_it_matter, how_is_it_solved_today
            FROM cycle_problems WHERE cycle_id = $1
            "#,
        )
        .bind(cycle_id)
        .fetch_optional(&self.pool)
        .await?;

        let context = sqlx::query_as::<_, CycleContext>(
            r#"
            SELECT who, when_context, where_context, frequency, description, severity, evidence
            FROM cycle_contexts WHERE cycle_id = $1
            "#,
        )
        .bind(cycle_id)
        .fetch_optional(&self.pool)
        .await?;

        let value_assessment = sqlx::query_as::<_, ValueAssessment>(
            r#"
            SELECT desperate_user_confirmed, interviews_completed, spending_money,
                   top_priority, actively_searching, built_workaround, willing_to_pay
            FROM value_assessments WHERE cycle_id = $1
            "#,
        )
        .bind(cycle_id)
        .fetch_optional(&self.pool)
        .await?;

        let impact_assessment = sqlx::query_as::<_, ImpactAssessment>(
            "SELECT is_complete, total_users FROM impact_assessments WHERE cycle_id = $1",
        )
        .bind(cycle_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(CycleAggregate {
            id: cycle.id,
            name: cycle.name,
            user_id: cycle.user_id,
            problem,
            context,
            value_assessment,
            impact_assessment,
        }))
    }

    async fn institution_for_user(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let row = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT institution_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.flatten())
    }
}
