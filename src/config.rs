use crate::model::AssessmentKind;
use std::collections::HashMap;

/// Identity columns every sheet carries alongside the assessment columns.
#[derive(Debug, Clone)]
pub struct StandardColumns {
    pub first_name: String,
    pub last_name: String,
    pub id: String,
}

impl Default for StandardColumns {
    fn default() -> Self {
        StandardColumns {
            first_name: "First Name".into(),
            last_name: "Last Name".into(),
            id: "ID".into(),
        }
    }
}

/// Hand-curated shortened-name → canonical-name mappings, scoped by class.
/// Keys and lookups are exact; fuzzy matching is a separate, later stage.
#[derive(Debug, Clone, Default)]
pub struct NameAliases {
    entries: HashMap<(String, String, String), (String, String)>,
}

impl NameAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        class_name: &str,
        short: (&str, &str),
        canonical: (&str, &str),
    ) -> &mut Self {
        self.entries.insert(
            (class_name.into(), short.0.into(), short.1.into()),
            (canonical.0.into(), canonical.1.into()),
        );
        self
    }

    /// Returns the canonical (first, last) pair, or the input unchanged.
    pub fn resolve(&self, class_name: &str, first: &str, last: &str) -> (String, String) {
        let key = (class_name.to_string(), first.to_string(), last.to_string());
        match self.entries.get(&key) {
            Some((f, l)) => (f.clone(), l.clone()),
            None => (first.to_string(), last.to_string()),
        }
    }
}

/// Meaning of a column that predates the pattern grammar.
#[derive(Debug, Clone)]
pub enum LegacyMeaning {
    /// Free-text comment attached to another column's assessment.
    Comment { parent: String },
    /// Sets `engagement.social_hours` instead of recording an assessment.
    SocialHours,
    /// A fixed-meaning assessment column (legacy homework, consultation
    /// attendance, ...).
    Assessment {
        kind: AssessmentKind,
        task_name: String,
    },
}

/// Static name→meaning table for hand-maintained legacy columns the
/// classifier knows nothing about.
#[derive(Debug, Clone, Default)]
pub struct LegacyColumnMap {
    entries: HashMap<String, LegacyMeaning>,
}

impl LegacyColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, column: &str, meaning: LegacyMeaning) -> &mut Self {
        self.entries.insert(column.into(), meaning);
        self
    }

    pub fn get(&self, column: &str) -> Option<&LegacyMeaning> {
        self.entries.get(column)
    }
}

/// Assessment base column ("KD1", "PD3") → ordered curriculum objective
/// codes it evidences. Order matters: Cambridge sub-score index k maps to
/// the (k−1)-th listed objective, and a bare C score to the first.
#[derive(Debug, Clone, Default)]
pub struct ObjectiveMap {
    entries: HashMap<String, Vec<String>>,
}

impl ObjectiveMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, base: &str, objectives: &[&str]) -> &mut Self {
        self.entries
            .insert(base.into(), objectives.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn objectives_for(&self, base: &str) -> &[String] {
        self.entries.get(base).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Whether a later, lower score may pull a completed mission back to
/// in-progress. Off by default: transitions only move forward.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissionPolicy {
    pub reopen_completed: bool,
}

/// Everything the pipeline needs injected: lookup tables and thresholds.
/// Read-only for the duration of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub standard: StandardColumns,
    pub aliases: NameAliases,
    pub legacy: LegacyColumnMap,
    pub objectives: ObjectiveMap,
    pub missions: MissionPolicy,
    /// Minimum combined similarity for a fuzzy identity match.
    pub fuzzy_threshold: f64,
    /// Academic context stamped onto newly created records.
    pub academic_year: String,
    pub grade: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            standard: StandardColumns::default(),
            aliases: NameAliases::default(),
            legacy: LegacyColumnMap::default(),
            objectives: ObjectiveMap::default(),
            missions: MissionPolicy::default(),
            fuzzy_threshold: 0.9,
            academic_year: "2025-2026".into(),
            grade: 8,
        }
    }
}
