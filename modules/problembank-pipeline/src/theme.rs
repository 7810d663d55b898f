//! Keyword theme classifier.
//!
//! An ordered decision table: rules are tried top to bottom and the first
//! match wins, so a problem mentioning both patients and schools is filed
//! under healthcare.

use std::sync::LazyLock;

use regex::Regex;

pub const HEALTHCARE: &str = "healthcare";
pub const EDUCATION: &str = "education";
pub const AGRICULTURE: &str = "agriculture";
pub const ENVIRONMENT: &str = "environment";
pub const COMMUNITY: &str = "community";
pub const PLATFORM: &str = "platform";
pub const OTHER: &str = "other";

static THEME_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\b(health|hospital|clinic|patient|medical|medicine|doctor|nurse|disease|pharmac|mental)",
            HEALTHCARE,
        ),
        (
            r"\b(school|student|teacher|educat|learn|classroom|course|curriculum|tutor|universit|exam|attendance)",
            EDUCATION,
        ),
        (
            r"\b(farm|crop|agricultur|harvest|livestock|irrigat|soil|fertili[sz])",
            AGRICULTURE,
        ),
        (
            r"\b(environment|climate|pollut|waste|recycl|carbon|emission|energy|water)",
            ENVIRONMENT,
        ),
        (
            r"\b(community|neighbou?rhood|volunteer|citizen|social|youth|elderly|local)",
            COMMUNITY,
        ),
        (
            r"\b(platform|admin|dashboard|software|app|website|portal|system|database|workflow)",
            PLATFORM,
        ),
    ]
    .into_iter()
    .map(|(pattern, theme)| (Regex::new(pattern).expect("valid regex"), theme))
    .collect()
});

/// Classify free text into a theme. Never fails: unmatched text is `"other"`.
pub fn classify_theme(text: &str) -> &'static str {
    let text = text.to_lowercase();
    THEME_RULES
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, theme)| *theme)
        .unwrap_or(OTHER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_each_category() {
        assert_eq!(classify_theme("Patients wait hours at the clinic"), HEALTHCARE);
        assert_eq!(classify_theme("Students lose track of assignments"), EDUCATION);
        assert_eq!(classify_theme("Smallholder farms lose crops to pests"), AGRICULTURE);
        assert_eq!(classify_theme("Plastic waste clogs drains"), ENVIRONMENT);
        assert_eq!(classify_theme("Volunteers can't coordinate shifts"), COMMUNITY);
        assert_eq!(classify_theme("The admin dashboard is slow"), PLATFORM);
        assert_eq!(classify_theme("Parking is hard to find"), OTHER);
    }

    #[test]
    fn first_rule_wins_over_later_matches() {
        // Mentions education, environment and platform keywords too.
        let text = "school nurses track student water intake in a spreadsheet system";
        assert_eq!(classify_theme(text), HEALTHCARE);
        assert_eq!(classify_theme("school water system"), EDUCATION);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify_theme("HOSPITAL BEDS"), HEALTHCARE);
    }

    #[test]
    fn keywords_match_on_word_start_only() {
        // "snapp" contains "app" but not at a word boundary.
        assert_eq!(classify_theme("snapped cables"), OTHER);
    }

    #[test]
    fn empty_text_is_other() {
        assert_eq!(classify_theme(""), OTHER);
    }
}
