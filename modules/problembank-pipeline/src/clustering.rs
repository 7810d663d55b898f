//! Theme clusters and administrator-curated clusters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use problembank_common::{
    Cluster, NewCluster, NewMembership, Origin, ProblemBankError, ProblemRecord, Result,
};
use problembank_store::ProblemStore;

use crate::theme;

pub const AUTO_MEMBERSHIP_SCORE: f64 = 0.8;
pub const CENTROID_SCORE: f64 = 1.0;
pub const MANUAL_MEMBERSHIP_SCORE: f64 = 0.9;

/// A theme needs at least this many open problems to get a cluster.
const MIN_THEME_MEMBERS: usize = 2;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Lowercase, collapse runs of non-alphanumerics into one hyphen, trim hyphens.
pub fn slugify(name: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

pub fn theme_slug(theme: &str) -> String {
    format!("theme-{}", slugify(theme))
}

pub fn friendly_name(theme: &str) -> String {
    match theme {
        theme::HEALTHCARE => "Healthcare Access".into(),
        theme::EDUCATION => "Education & Learning".into(),
        theme::AGRICULTURE => "Agriculture & Food Systems".into(),
        theme::ENVIRONMENT => "Environment & Climate".into(),
        theme::COMMUNITY => "Community & Social Cohesion".into(),
        theme::PLATFORM => "Platforms & Administration".into(),
        theme::OTHER => "Other Problems".into(),
        other => format!("{other} Problems"),
    }
}

/// Problem ids per non-null theme, in theme order.
pub fn group_by_theme(problems: &[ProblemRecord]) -> BTreeMap<&str, Vec<Uuid>> {
    let mut groups: BTreeMap<&str, Vec<Uuid>> = BTreeMap::new();
    for problem in problems {
        if let Some(theme) = problem.theme.as_deref() {
            groups.entry(theme).or_default().push(problem.id);
        }
    }
    groups
}

/// Input for an administrator-curated cluster. The first problem listed
/// becomes the centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub primary_theme: Option<String>,
    pub problem_ids: Vec<Uuid>,
}

impl CreateClusterRequest {
    /// Checked name plus the member ids with repeats removed, order kept.
    fn normalized(&self) -> Result<(String, Vec<Uuid>)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ProblemBankError::Validation("cluster name is required".into()));
        }
        if self.problem_ids.is_empty() {
            return Err(ProblemBankError::Validation(
                "at least one problem id is required".into(),
            ));
        }

        let mut ids: Vec<Uuid> = Vec::with_capacity(self.problem_ids.len());
        for id in &self.problem_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        Ok((name.to_string(), ids))
    }
}

#[derive(Clone)]
pub struct ClusterBuilder {
    store: Arc<dyn ProblemStore>,
}

impl ClusterBuilder {
    pub fn new(store: Arc<dyn ProblemStore>) -> Self {
        Self { store }
    }

    /// Group open problems by theme into auto clusters. Returns the number of
    /// clusters touched. Safe to re-run: memberships and stats converge.
    pub async fn rebuild_theme_clusters(&self) -> Result<usize> {
        let open = self.store.open_problems(None).await?;
        let mut touched = 0;

        for (theme, members) in group_by_theme(&open) {
            if members.len() < MIN_THEME_MEMBERS {
                continue;
            }
            if slugify(theme).is_empty() {
                debug!(theme, "Theme has no sluggable characters, skipping");
                continue;
            }

            let new_cluster = NewCluster {
                name: friendly_name(theme),
                slug: theme_slug(theme),
                primary_theme: Some(theme.to_string()),
                description: Some(format!("Open problems classified under \"{theme}\".")),
                created_by: Origin::Auto,
            };
            let Some(cluster) = self.store.upsert_cluster_by_slug(&new_cluster).await? else {
                debug!(slug = %new_cluster.slug, "Slug held by a manual cluster, skipping");
                continue;
            };
            if !cluster.is_active() {
                debug!(cluster_id = %cluster.id, "Theme cluster is archived, skipping");
                continue;
            }

            let memberships: Vec<NewMembership> = members
                .iter()
                .map(|problem_id| NewMembership::auto(cluster.id, *problem_id, AUTO_MEMBERSHIP_SCORE))
                .collect();
            self.store.upsert_memberships(&memberships).await?;
            self.store.refresh_cluster_stats(cluster.id).await?;

            debug!(cluster_id = %cluster.id, theme, members = members.len(), "Theme cluster updated");
            touched += 1;
        }

        info!(clusters_updated = touched, "Theme clustering complete");
        Ok(touched)
    }

    /// Create a curated cluster from an explicit problem list.
    pub async fn create_manual(&self, request: &CreateClusterRequest) -> Result<Cluster> {
        let (name, ids) = request.normalized()?;
        let slug = slugify(&name);
        if slug.is_empty() {
            return Err(ProblemBankError::Validation(format!(
                "cluster name \"{name}\" has no characters usable in a slug"
            )));
        }

        let found = self.store.get_problems(&ids).await?;
        if let Some(missing) = ids.iter().find(|id| !found.iter().any(|p| p.id == **id)) {
            return Err(ProblemBankError::problem_not_found(*missing));
        }

        let cluster = self
            .store
            .insert_cluster(&NewCluster {
                name,
                slug,
                primary_theme: request.primary_theme.clone(),
                description: request.description.clone(),
                created_by: Origin::Manual,
            })
            .await?;

        let memberships: Vec<NewMembership> = ids
            .iter()
            .enumerate()
            .map(|(i, problem_id)| {
                if i == 0 {
                    NewMembership::manual(cluster.id, *problem_id, CENTROID_SCORE, true)
                } else {
                    NewMembership::manual(cluster.id, *problem_id, MANUAL_MEMBERSHIP_SCORE, false)
                }
            })
            .collect();
        self.store.upsert_memberships(&memberships).await?;

        let cluster = self
            .store
            .refresh_cluster_stats(cluster.id)
            .await?
            .ok_or_else(|| ProblemBankError::cluster_not_found(cluster.id))?;

        info!(
            cluster_id = %cluster.id,
            slug = %cluster.slug,
            members = ids.len(),
            "Created manual cluster"
        );
        Ok(cluster)
    }

    /// Archive a cluster. Archiving an archived cluster returns it unchanged.
    pub async fn archive(&self, cluster_id: Uuid) -> Result<Cluster> {
        let cluster = self
            .store
            .archive_cluster(cluster_id)
            .await?
            .ok_or_else(|| ProblemBankError::cluster_not_found(cluster_id))?;
        info!(cluster_id = %cluster_id, "Cluster archived");
        Ok(cluster)
    }

    pub async fn refresh_stats(&self, cluster_id: Uuid) -> Result<Cluster> {
        self.store
            .refresh_cluster_stats(cluster_id)
            .await?
            .ok_or_else(|| ProblemBankError::cluster_not_found(cluster_id))
    }
}
