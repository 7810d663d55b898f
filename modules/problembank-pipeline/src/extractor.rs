//! Turns a cycle aggregate into one problem record plus interview evidence.
//!
//! Everything up to the store write is a pure function of the cycle, so the
//! fallback rules are unit-tested without any storage.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use problembank_common::{
    truncate_title, CycleAggregate, NewEvidence, NewProblem, ProblemBankError, Result,
    ValidationStatus,
};
use problembank_store::{CycleSource, ProblemStore};

use crate::theme::classify_theme;

pub const UNTITLED_PROBLEM: &str = "Untitled Problem";
pub const EMPTY_STATEMENT: &str = "No problem statement provided.";
const EXTRACTION_METHOD: &str = "heuristic";
const EXTRACTION_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub problem_id: Uuid,
    pub evidence_written: u32,
    pub evidence_failed: u32,
}

pub struct Extractor {
    store: Arc<dyn ProblemStore>,
    cycles: Arc<dyn CycleSource>,
}

impl Extractor {
    pub fn new(store: Arc<dyn ProblemStore>, cycles: Arc<dyn CycleSource>) -> Self {
        Self { store, cycles }
    }

    /// Extract a cycle into the problem bank.
    ///
    /// Fails with `DuplicateExtraction` if the cycle already has a problem,
    /// before anything is written. Evidence write failures are logged and
    /// counted but never undo the problem write.
    pub async fn extract(&self, cycle_id: Uuid) -> Result<ExtractionOutcome> {
        if let Some(problem_id) = self.store.problem_id_for_cycle(cycle_id).await? {
            return Err(ProblemBankError::DuplicateExtraction {
                cycle_id,
                problem_id,
            });
        }

        let cycle = self
            .cycles
            .load_cycle(cycle_id)
            .await?
            .ok_or_else(|| ProblemBankError::cycle_not_found(cycle_id))?;
        let institution_id = self.cycles.institution_for_user(cycle.user_id).await?;

        let new_problem = build_problem(&cycle, institution_id);
        let record = self.store.insert_problem(&new_problem).await?;

        info!(
            cycle_id = %cycle_id,
            problem_id = %record.id,
            theme = record.theme.as_deref().unwrap_or("-"),
            validation_status = %record.validation_status,
            "Extracted problem from cycle"
        );

        let mut outcome = ExtractionOutcome {
            problem_id: record.id,
            evidence_written: 0,
            evidence_failed: 0,
        };

        let evidence = cycle
            .context
            .as_ref()
            .and_then(|c| c.evidence.as_ref())
            .map(|value| evidence_items(record.id, value, Utc::now()))
            .unwrap_or_default();

        for item in &evidence {
            match self.store.insert_evidence(item).await {
                Ok(_) => outcome.evidence_written += 1,
                Err(e) => {
                    outcome.evidence_failed += 1;
                    warn!(
                        problem_id = %record.id,
                        error = %e,
                        "Failed to store interview evidence"
                    );
                }
            }
        }

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Pure derivation
// ---------------------------------------------------------------------------

/// Build the insert parameters for a cycle's problem record.
pub fn build_problem(cycle: &CycleAggregate, institution_id: Option<Uuid>) -> NewProblem {
    let context = cycle.context.clone().unwrap_or_default();
    let criteria_met = desperate_user_score(cycle);

    NewProblem::builder()
        .title(derive_title(cycle))
        .problem_statement(assemble_statement(cycle))
        .theme(Some(classify_theme(&theme_text(cycle)).to_string()))
        .who_affected(non_empty(context.who.as_deref()))
        .when_occurs(non_empty(context.when_context.as_deref()))
        .where_occurs(non_empty(context.where_context.as_deref()))
        .frequency(non_empty(context.frequency.as_deref()))
        .severity_rating(context.severity.filter(|s| (1..=10).contains(s)))
        .validation_status(validation_status(cycle))
        .desperate_user_score(criteria_met)
        .source_cycle_id(Some(cycle.id))
        .submitted_by(cycle.user_id)
        .institution_id(institution_id)
        .metadata(json!({
            "extraction": {
                "method": EXTRACTION_METHOD,
                "version": EXTRACTION_VERSION,
            },
            "cycle_name": cycle.name,
        }))
        .build()
}

/// First non-empty candidate, in precedence order, truncated to the title limit.
pub fn derive_title(cycle: &CycleAggregate) -> String {
    let mut candidates: Vec<Option<&str>> = Vec::new();
    if let Some(problem) = &cycle.problem {
        candidates.push(problem.refined_statement.as_deref());
        candidates.push(problem.selected_question.as_deref());
        candidates.push(problem.raw_question.as_deref());
        candidates.extend(problem.discovery_answers().into_iter().map(|(_, answer)| answer));
    }
    candidates.push(cycle.name.as_deref());

    let title = candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(UNTITLED_PROBLEM);
    truncate_title(title)
}

/// Join every available piece of problem text with blank lines.
pub fn assemble_statement(cycle: &CycleAggregate) -> String {
    let mut parts: Vec<String> = Vec::new();
    // Raw values already emitted, for verbatim-duplicate suppression.
    let mut seen: Vec<&str> = Vec::new();

    if let Some(problem) = &cycle.problem {
        if let Some(refined) = non_empty_str(problem.refined_statement.as_deref()) {
            parts.push(refined.to_string());
            seen.push(refined);
        }

        let question = non_empty_str(problem.selected_question.as_deref())
            .or_else(|| non_empty_str(problem.raw_question.as_deref()));
        if let Some(question) = question {
            if !seen.contains(&question) {
                parts.push(question.to_string());
                seen.push(question);
            }
        }

        for (label, answer) in problem.discovery_answers() {
            let Some(answer) = non_empty_str(answer) else {
                continue;
            };
            if seen.contains(&answer) {
                continue;
            }
            parts.push(format!("{label}\n{answer}"));
            seen.push(answer);
        }
    }

    if let Some(context) = &cycle.context {
        if let Some(description) = non_empty_str(context.description.as_deref()) {
            if !seen.contains(&description) {
                parts.push(description.to_string());
            }
        }
        let who = non_empty_str(context.who.as_deref());
        let when = non_empty_str(context.when_context.as_deref());
        if let (Some(who), Some(when)) = (who, when) {
            parts.push(format!("Affects {who} {when}."));
        }
    }

    if parts.is_empty() {
        EMPTY_STATEMENT.to_string()
    } else {
        parts.join("\n\n")
    }
}

/// Strongest validation evidence present on the cycle.
pub fn validation_status(cycle: &CycleAggregate) -> ValidationStatus {
    let impact = cycle.impact_assessment.as_ref();
    if impact.is_some_and(|i| i.is_complete == Some(true) && i.total_users.unwrap_or(0) > 0) {
        return ValidationStatus::MarketValidated;
    }

    let value = cycle.value_assessment.as_ref();
    if value.is_some_and(|v| v.desperate_user_confirmed == Some(true)) {
        return ValidationStatus::DesperateUserConfirmed;
    }
    if value.is_some_and(|v| v.interviews_completed.unwrap_or(0) > 0) {
        return ValidationStatus::UserTested;
    }

    ValidationStatus::Unvalidated
}

/// Count of satisfied desperate-user criteria; `None` rather than zero when
/// none are satisfied.
pub fn desperate_user_score(cycle: &CycleAggregate) -> Option<i16> {
    let value = cycle.value_assessment.as_ref()?;
    let met = value
        .criteria()
        .iter()
        .filter(|c| **c == Some(true))
        .count() as i16;
    (met > 0).then_some(met)
}

fn theme_text(cycle: &CycleAggregate) -> String {
    let mut pieces: Vec<&str> = Vec::new();
    if let Some(problem) = &cycle.problem {
        pieces.extend(
            [
                problem.refined_statement.as_deref(),
                problem.selected_question.as_deref(),
                problem.raw_question.as_deref(),
                problem.what_is_the_problem.as_deref(),
            ]
            .into_iter()
            .flatten(),
        );
    }
    if let Some(context) = &cycle.context {
        pieces.extend(
            [
                context.description.as_deref(),
                context.who.as_deref(),
                context.where_context.as_deref(),
            ]
            .into_iter()
            .flatten(),
        );
    }
    pieces.join(" ").to_lowercase()
}

fn non_empty_str(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    non_empty_str(value).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Evidence mapping
// ---------------------------------------------------------------------------

const CONTENT_KEYS: &[&str] = &["notes", "summary", "content", "quote", "insight"];
const NAME_KEYS: &[&str] = &["name", "interviewee", "source"];
const ROLE_KEYS: &[&str] = &["role", "title", "occupation"];
const PAIN_KEYS: &[&str] = &["pain_level", "painLevel", "pain"];
const DATE_KEYS: &[&str] = &["date", "interviewed_at", "collected_at"];

/// Map interview-like entries of an evidence array to evidence rows.
/// Non-array values yield nothing; entries without usable content are skipped.
pub fn evidence_items(problem_id: Uuid, evidence: &Value, now: DateTime<Utc>) -> Vec<NewEvidence> {
    let Some(entries) = evidence.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(text) => non_empty(Some(text.as_str())).map(|content| NewEvidence {
                problem_id,
                content,
                source_name: None,
                source_role: None,
                pain_level: None,
                collected_at: now,
            }),
            Value::Object(_) => {
                let content =
                    first_string(entry, CONTENT_KEYS).unwrap_or_else(|| entry.to_string());
                Some(NewEvidence {
                    problem_id,
                    content,
                    source_name: first_string(entry, NAME_KEYS),
                    source_role: first_string(entry, ROLE_KEYS),
                    pain_level: pain_level(entry),
                    collected_at: collected_at(entry).unwrap_or(now),
                })
            }
            _ => None,
        })
        .collect()
}

fn first_string(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| entry.get(*k))
        .filter_map(Value::as_str)
        .find_map(|s| non_empty(Some(s)))
}

fn pain_level(entry: &Value) -> Option<i16> {
    let raw = PAIN_KEYS.iter().filter_map(|k| entry.get(*k)).find_map(|v| {
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
    })?;
    raw.is_finite().then(|| raw.round().clamp(1.0, 10.0) as i16)
}

fn collected_at(entry: &Value) -> Option<DateTime<Utc>> {
    let raw = DATE_KEYS
        .iter()
        .filter_map(|k| entry.get(*k))
        .find_map(Value::as_str)?
        .trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
