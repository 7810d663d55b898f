//! Read-only view of an innovation cycle, as consumed by extraction.
//!
//! Every sub-record is optional: a cycle may be extracted part-way through the
//! methodology, so the extractor falls back field by field.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleAggregate {
    pub id: Uuid,
    pub name: Option<String>,
    pub user_id: Uuid,
    pub problem: Option<CycleProblem>,
    pub context: Option<CycleContext>,
    pub value_assessment: Option<ValueAssessment>,
    pub impact_assessment: Option<ImpactAssessment>,
}

/// Problem-statement step of the cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CycleProblem {
    pub refined_statement: Option<String>,
    pub selected_question: Option<String>,
    pub raw_question: Option<String>,
    pub what_is_the_problem: Option<String>,
    pub who_experiences_it: Option<String>,
    pub when_does_it_happen: Option<String>,
    pub why_does_it_matter: Option<String>,
    pub how_is_it_solved_today: Option<String>,
}

impl CycleProblem {
    /// Discovery answers in their fixed question order, with display labels.
    pub fn discovery_answers(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("What is the problem?", self.what_is_the_problem.as_deref()),
            ("Who experiences it?", self.who_experiences_it.as_deref()),
            ("When does it happen?", self.when_does_it_happen.as_deref()),
            ("Why does it matter?", self.why_does_it_matter.as_deref()),
            ("How is it solved today?", self.how_is_it_solved_today.as_deref()),
        ]
    }
}

/// Context step: who/when/where plus interview evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CycleContext {
    pub who: Option<String>,
    pub when_context: Option<String>,
    pub where_context: Option<String>,
    pub frequency: Option<String>,
    pub description: Option<String>,
    pub severity: Option<i16>,
    /// Free-form interview notes. Only array-shaped values yield evidence.
    pub evidence: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ValueAssessment {
    pub desperate_user_confirmed: Option<bool>,
    pub interviews_completed: Option<i32>,
    pub spending_money: Option<bool>,
    pub top_priority: Option<bool>,
    pub actively_searching: Option<bool>,
    pub built_workaround: Option<bool>,
    pub willing_to_pay: Option<bool>,
}

impl ValueAssessment {
    /// The five desperate-user criteria.
    pub fn criteria(&self) -> [Option<bool>; 5] {
        [
            self.spending_money,
            self.top_priority,
            self.actively_searching,
            self.built_workaround,
            self.willing_to_pay,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImpactAssessment {
    pub is_complete: Option<bool>,
    pub total_users: Option<i32>,
}
