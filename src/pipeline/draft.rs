// Product draft with AI provenance tracking

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::types::{AnalysisResult, CanonicalCategory, ImageAsset};
use crate::pipeline::reconciler;

/// Fields the analyzer may populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftField {
    Title,
    Description,
    Category,
    Material,
    Dimensions,
}

/// An in-progress product form.
///
/// `ai_fields` records which fields were last written by the analyzer; a
/// human edit to a field clears its mark, so provenance always reflects
/// the most recent writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductDraft {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub material: String,
    pub dimensions: String,
    pub price: Option<f64>,
    pub images: Vec<ImageAsset>,
    #[serde(default)]
    ai_fields: HashSet<DraftField>,
}

impl ProductDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a human edit to a field. The value is taken as-is and the
    /// field's AI provenance mark is cleared.
    pub fn edit_field(&mut self, field: DraftField, value: &str) {
        match field {
            DraftField::Title => self.title = value.to_string(),
            DraftField::Description => self.description = value.to_string(),
            DraftField::Category => {
                self.category = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            DraftField::Material => self.material = value.to_string(),
            DraftField::Dimensions => self.dimensions = value.to_string(),
        }
        self.ai_fields.remove(&field);
    }

    pub fn is_ai_populated(&self, field: DraftField) -> bool {
        self.ai_fields.contains(&field)
    }

    /// Fold an analysis result into the draft.
    ///
    /// Only non-empty fields are applied; each applied field is marked as
    /// AI-populated. The category guess goes through the reconciler and
    /// is dropped when it matches nothing canonical. Returns the number
    /// of fields applied.
    pub fn apply_analysis(
        &mut self,
        analysis: &AnalysisResult,
        categories: &[CanonicalCategory],
    ) -> usize {
        let mut applied = 0;

        if let Some(title) = non_empty(&analysis.title) {
            self.title = title.to_string();
            self.ai_fields.insert(DraftField::Title);
            applied += 1;
        }
        if let Some(description) = non_empty(&analysis.description) {
            self.description = description.to_string();
            self.ai_fields.insert(DraftField::Description);
            applied += 1;
        }
        let guess = non_empty(&analysis.category).or_else(|| non_empty(&analysis.category_guess));
        if let Some(guess) = guess {
            if let Some(category) = reconciler::reconcile(guess, categories) {
                self.category = Some(category.slug.clone());
                self.ai_fields.insert(DraftField::Category);
                applied += 1;
            }
        }
        if let Some(material) = non_empty(&analysis.material) {
            self.material = material.to_string();
            self.ai_fields.insert(DraftField::Material);
            applied += 1;
        }
        if let Some(dimensions) = non_empty(&analysis.dimensions) {
            self.dimensions = dimensions.to_string();
            self.ai_fields.insert(DraftField::Dimensions);
            applied += 1;
        }

        applied
    }

    pub fn push_image(&mut self, asset: ImageAsset) {
        self.images.push(asset);
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<CanonicalCategory> {
        vec![CanonicalCategory::new("1", "Bouquets", "bouquets")]
    }

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            title: Some("Peony Dream".to_string()),
            description: Some("A soft arrangement of peonies.".to_string()),
            category: Some("bouquets".to_string()),
            category_guess: None,
            material: Some("Fresh peonies, eucalyptus".to_string()),
            dimensions: None,
        }
    }

    #[test]
    fn apply_analysis_marks_provenance() {
        let mut draft = ProductDraft::new();
        let applied = draft.apply_analysis(&analysis(), &categories());

        assert_eq!(applied, 4);
        assert_eq!(draft.title, "Peony Dream");
        assert_eq!(draft.category.as_deref(), Some("bouquets"));
        assert!(draft.is_ai_populated(DraftField::Title));
        assert!(draft.is_ai_populated(DraftField::Category));
        assert!(!draft.is_ai_populated(DraftField::Dimensions));
    }

    #[test]
    fn human_edit_clears_provenance() {
        let mut draft = ProductDraft::new();
        draft.apply_analysis(&analysis(), &categories());

        draft.edit_field(DraftField::Title, "White Peony Bouquet");
        assert_eq!(draft.title, "White Peony Bouquet");
        assert!(!draft.is_ai_populated(DraftField::Title));
        // Other fields keep their marks
        assert!(draft.is_ai_populated(DraftField::Description));
    }

    #[test]
    fn label_guess_is_reconciled_into_the_draft() {
        let mut draft = ProductDraft::new();
        let result = AnalysisResult {
            category: None,
            category_guess: Some("Bouquets".to_string()),
            ..Default::default()
        };

        let applied = draft.apply_analysis(&result, &categories());
        assert_eq!(applied, 1);
        assert_eq!(draft.category.as_deref(), Some("bouquets"));
        assert!(draft.is_ai_populated(DraftField::Category));
    }

    #[test]
    fn unreconcilable_category_is_not_applied() {
        let mut draft = ProductDraft::new();
        let mut result = analysis();
        result.category = Some("chocolates".to_string());

        let applied = draft.apply_analysis(&result, &categories());
        assert_eq!(applied, 3);
        assert!(draft.category.is_none());
        assert!(!draft.is_ai_populated(DraftField::Category));
    }

    #[test]
    fn blank_fields_are_skipped() {
        let mut draft = ProductDraft::new();
        draft.edit_field(DraftField::Title, "Keep Me");

        let result = AnalysisResult {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        let applied = draft.apply_analysis(&result, &categories());
        assert_eq!(applied, 0);
        assert_eq!(draft.title, "Keep Me");
    }
}
