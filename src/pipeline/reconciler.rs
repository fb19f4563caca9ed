// Category reconciliation: mapping a free-text guess onto the canonical list

use tracing::debug;

use crate::core::types::{AnalysisResult, CanonicalCategory};

type MatchStrategy = fn(&str, &CanonicalCategory) -> bool;

/// Ordered matching strategies, strictest first. The first strategy that
/// matches any category wins; later strategies never override an earlier
/// one.
const STRATEGIES: &[(&str, MatchStrategy)] = &[
    ("exact_slug", exact_slug),
    ("exact_label", exact_label),
    ("ci_slug", ci_slug),
    ("ci_label", ci_label),
    ("hyphenated_label", hyphenated_label),
    ("label_contains_guess", label_contains_guess),
];

fn exact_slug(guess: &str, category: &CanonicalCategory) -> bool {
    category.slug == guess
}

fn exact_label(guess: &str, category: &CanonicalCategory) -> bool {
    category.label == guess
}

fn ci_slug(guess: &str, category: &CanonicalCategory) -> bool {
    category.slug.eq_ignore_ascii_case(guess)
}

fn ci_label(guess: &str, category: &CanonicalCategory) -> bool {
    category.label.eq_ignore_ascii_case(guess)
}

fn hyphenated_label(guess: &str, category: &CanonicalCategory) -> bool {
    let hyphenated = category
        .label
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    hyphenated == guess.to_lowercase()
}

fn label_contains_guess(guess: &str, category: &CanonicalCategory) -> bool {
    let guess = guess.trim().to_lowercase();
    !guess.is_empty() && category.label.to_lowercase().contains(&guess)
}

/// Resolve a guessed category name against the canonical list.
///
/// Returns None when no strategy matches; callers must then leave the
/// draft's category unset rather than invent one.
pub fn reconcile<'a>(
    guess: &str,
    categories: &'a [CanonicalCategory],
) -> Option<&'a CanonicalCategory> {
    let guess = guess.trim();
    if guess.is_empty() {
        return None;
    }

    for (name, strategy) in STRATEGIES {
        if let Some(found) = categories.iter().find(|c| strategy(guess, c)) {
            debug!("Category '{}' matched '{}' via {}", guess, found.slug, name);
            return Some(found);
        }
    }
    None
}

/// Fold a reconciled category into an analysis result.
///
/// A slug that already passed validation is kept; otherwise the model's
/// raw guess goes through the strategy list. An unresolvable guess
/// leaves the field unset so it can never reach persistence.
pub fn reconcile_analysis(analysis: &mut AnalysisResult, categories: &[CanonicalCategory]) {
    if analysis.category.is_some() {
        return;
    }
    if let Some(guess) = analysis.category_guess.as_deref() {
        analysis.category = reconcile(guess, categories).map(|c| c.slug.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<CanonicalCategory> {
        vec![
            CanonicalCategory::new("1", "Bouquets", "bouquets"),
            CanonicalCategory::new("2", "Dried Flowers", "dried-flowers"),
            CanonicalCategory::new("3", "Vases & Holders", "vases"),
        ]
    }

    #[test]
    fn exact_slug_wins() {
        let cats = categories();
        assert_eq!(reconcile("dried-flowers", &cats).unwrap().id, "2");
    }

    #[test]
    fn exact_label_matches() {
        let cats = categories();
        assert_eq!(reconcile("Dried Flowers", &cats).unwrap().id, "2");
    }

    #[test]
    fn case_insensitive_slug_matches() {
        let cats = categories();
        assert_eq!(reconcile("BOUQUETS", &cats).unwrap().id, "1");
    }

    #[test]
    fn hyphenated_label_matches() {
        let cats = categories();
        // "Vases & Holders" hyphenates to "vases-&-holders", not this,
        // but "Dried Flowers" hyphenates to the guess
        assert_eq!(reconcile("Dried-Flowers", &cats).unwrap().id, "2");
    }

    #[test]
    fn substring_of_label_matches_last() {
        let cats = categories();
        assert_eq!(reconcile("vases", &cats).unwrap().id, "3");
        assert_eq!(reconcile("holders", &cats).unwrap().id, "3");
    }

    #[test]
    fn earlier_strategy_beats_later_one() {
        // "bouquets" is both an exact slug of #1 and a ci substring of
        // nothing else; exact slug must decide
        let cats = vec![
            CanonicalCategory::new("1", "Spring Bouquets Deluxe", "spring"),
            CanonicalCategory::new("2", "Other", "bouquets"),
        ];
        assert_eq!(reconcile("bouquets", &cats).unwrap().id, "2");
    }

    #[test]
    fn no_match_returns_none() {
        let cats = categories();
        assert!(reconcile("chocolates", &cats).is_none());
        assert!(reconcile("", &cats).is_none());
        assert!(reconcile("   ", &cats).is_none());
    }

    #[test]
    fn label_guess_resolves_to_canonical_slug() {
        // A label-cased guess fails slug validation upstream but must
        // still land on the canonical slug here
        let cats = vec![CanonicalCategory::new(
            "1",
            "Artificial Flowers",
            "artificial-flowers",
        )];
        let mut analysis = AnalysisResult {
            title: Some("Elegant Orchid".to_string()),
            category: None,
            category_guess: Some("Artificial Flowers".to_string()),
            ..Default::default()
        };
        reconcile_analysis(&mut analysis, &cats);
        assert_eq!(analysis.category.as_deref(), Some("artificial-flowers"));
    }

    #[test]
    fn validated_slug_is_left_alone() {
        let cats = categories();
        let mut analysis = AnalysisResult {
            category: Some("bouquets".to_string()),
            category_guess: Some("something else".to_string()),
            ..Default::default()
        };
        reconcile_analysis(&mut analysis, &cats);
        assert_eq!(analysis.category.as_deref(), Some("bouquets"));
    }

    #[test]
    fn unresolvable_guess_stays_unset() {
        let cats = categories();
        let mut analysis = AnalysisResult {
            category_guess: Some("chocolates".to_string()),
            ..Default::default()
        };
        reconcile_analysis(&mut analysis, &cats);
        assert!(analysis.category.is_none());
    }
}
