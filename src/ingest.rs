use crate::aggregate::{aggregate_row, TrackedAttribute};
use crate::columns::{classify, CellValue};
use crate::config::PipelineConfig;
use crate::curriculum;
use crate::model::{
    Academic, CurriculumProgress, Engagement, Profile, RecordMetadata, StudentRecord,
    CURRENT_SCHEMA_VERSION,
};
use crate::names;
use crate::store::RecordStore;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

/// One sheet as delivered by the external spreadsheet reader: a header
/// date per column, the rows, and the optional trailing context row keyed
/// by base column.
#[derive(Debug, Clone, Default)]
pub struct SheetData {
    pub class_name: String,
    pub sheet_name: String,
    pub rows: Vec<Vec<(String, CellValue)>>,
    pub column_dates: HashMap<String, NaiveDate>,
    pub column_context: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub students_updated: usize,
    pub assessments_added: usize,
    pub new_students: usize,
}

/// Top-level orchestrator: loads the collection, folds every sheet row into
/// it, and persists the result. One invocation is one batch; re-running the
/// same workbook is a no-op by construction.
pub struct Importer<S: RecordStore> {
    store: S,
    config: PipelineConfig,
    today: NaiveDate,
}

impl<S: RecordStore> Importer<S> {
    pub fn new(store: S, config: PipelineConfig) -> Self {
        Importer {
            store,
            config,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Pin "today" for deterministic runs.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process a workbook. `allow_list` restricts which columns this run may
    /// touch; anything else on the sheets is invisible, which is what makes
    /// partial re-imports safe for previously recorded data.
    pub fn process_workbook(
        &self,
        sheets: &[SheetData],
        allow_list: Option<&HashSet<String>>,
    ) -> anyhow::Result<ImportSummary> {
        let mut records = self.store.load_all()?;
        let mut summary = ImportSummary::default();
        let mut next_id = next_student_id(&records);

        for sheet in sheets {
            tracing::info!(
                "processing sheet {} ({} rows, {} columns)",
                sheet.sheet_name,
                sheet.rows.len(),
                sheet.column_dates.len()
            );
            self.warn_unknown_columns(sheet);

            for row in &sheet.rows {
                let first = cell_text(row, &self.config.standard.first_name);
                let last = cell_text(row, &self.config.standard.last_name);
                let (Some(first), Some(last)) = (first, last) else {
                    tracing::warn!(
                        "skipping row with missing name data on sheet {}",
                        sheet.sheet_name
                    );
                    continue;
                };

                let index = match names::resolve(
                    &records,
                    &first,
                    &last,
                    &sheet.class_name,
                    &self.config.aliases,
                    self.config.fuzzy_threshold,
                ) {
                    Some(i) => i,
                    None => {
                        let (first, last) = names::canonical_name(
                            &self.config.aliases,
                            &sheet.class_name,
                            &first,
                            &last,
                        );
                        tracing::info!(
                            "creating new student {} {} in {}",
                            first,
                            last,
                            sheet.class_name
                        );
                        records.push(self.new_student(&first, &last, &sheet.class_name, next_id));
                        next_id += 1;
                        summary.new_students += 1;
                        records.len() - 1
                    }
                };

                let outcome = aggregate_row(
                    row,
                    &sheet.column_dates,
                    &sheet.column_context,
                    allow_list,
                    &self.config,
                    self.today,
                );

                let student = &mut records[index];
                let before = student.clone();
                let mut added = 0usize;

                for assessment in outcome.assessments {
                    if student.upsert_assessment(assessment, self.today) {
                        added += 1;
                    }
                }

                for update in &outcome.profile {
                    let slot = match update.attribute {
                        TrackedAttribute::NotebookOrganization => {
                            &mut student.profile.learning_attributes.notebook_organization
                        }
                        TrackedAttribute::ReflectivePractice => {
                            &mut student.profile.learning_attributes.reflective_practice
                        }
                    };
                    *slot = update.level;
                }

                if let Some(hours) = outcome.social_hours {
                    student.engagement.social_hours = hours;
                }

                for event in &outcome.curriculum {
                    curriculum::apply_event(
                        student,
                        event,
                        &self.config.objectives,
                        self.config.missions,
                        self.today,
                    );
                }

                if !outcome.curriculum.is_empty() {
                    curriculum::recompute_objective_summary(student);
                }

                // Stamp and count only on real change, so a re-run of the
                // same workbook leaves every record untouched.
                if *student != before {
                    student.metadata.updated_at = Some(self.today);
                    summary.students_updated += 1;
                }

                summary.assessments_added += added;
            }
        }

        for record in &records {
            self.store.save(record)?;
        }

        tracing::info!(
            "import complete: {} students updated, {} assessments added, {} new students",
            summary.students_updated,
            summary.assessments_added,
            summary.new_students
        );
        Ok(summary)
    }

    /// One warning per sheet for columns neither the grammar nor the legacy
    /// table knows; their cells are ignored for assessment purposes.
    fn warn_unknown_columns(&self, sheet: &SheetData) {
        let mut unknown: Vec<&str> = sheet
            .column_dates
            .keys()
            .map(String::as_str)
            .filter(|name| {
                *name != self.config.standard.first_name
                    && *name != self.config.standard.last_name
                    && *name != self.config.standard.id
                    && classify(name).is_none()
                    && self.config.legacy.get(name).is_none()
            })
            .collect();
        unknown.sort_unstable();
        for name in unknown {
            tracing::warn!(
                "unclassified column {:?} on sheet {}; ignoring",
                name,
                sheet.sheet_name
            );
        }
    }

    fn new_student(
        &self,
        first: &str,
        last: &str,
        class_name: &str,
        id_number: u32,
    ) -> StudentRecord {
        StudentRecord {
            id: format!("ST{:05}", id_number),
            first_name: first.to_string(),
            last_name: last.to_string(),
            class_name: class_name.to_string(),
            academic: Academic {
                year: self.config.academic_year.clone(),
                grade: self.config.grade,
                class_id: class_name.to_lowercase().replace(' ', "-"),
                enrolled_date: None,
            },
            profile: Profile::default(),
            assessments: Vec::new(),
            curriculum_progress: CurriculumProgress::default(),
            cambridge_missions: Vec::new(),
            engagement: Engagement::default(),
            metadata: RecordMetadata {
                schema_version: CURRENT_SCHEMA_VERSION.to_string(),
                created_at: Some(self.today),
                updated_at: Some(self.today),
            },
        }
    }
}

fn cell_text(row: &[(String, CellValue)], column: &str) -> Option<String> {
    row.iter()
        .find(|(name, _)| name == column)
        .and_then(|(_, value)| value.as_text())
}

/// Next free `ST#####` sequence number across the collection.
fn next_student_id(records: &[StudentRecord]) -> u32 {
    records
        .iter()
        .filter_map(|r| r.id.strip_prefix("ST"))
        .filter_map(|rest| rest.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1
}
