use super::model::StepCatalogEntry;
use std::collections::HashMap;

/// Immutable step catalog indexed by step label.
#[derive(Debug, Clone, Default)]
pub struct StepCatalog {
    entries: Vec<StepCatalogEntry>,
    by_step: HashMap<String, usize>,
}

impl StepCatalog {
    /// Builds the indexes. When a label appears in more than one level the
    /// first level (in the given order) owns it.
    pub fn new(entries: Vec<StepCatalogEntry>) -> Self {
        let mut by_step = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            for label in &entry.steps {
                by_step.entry(label.trim().to_string()).or_insert(i);
            }
        }
        Self { entries, by_step }
    }

    pub fn find_level_by_step_label(&self, step: &str) -> Option<&StepCatalogEntry> {
        self.by_step.get(step.trim()).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[StepCatalogEntry] {
        &self.entries
    }
}
