use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current on-disk schema version for records this crate processes directly.
pub const CURRENT_SCHEMA_VERSION: &str = "5.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentKind {
    /// KD columns: larger Cambridge unit summatives.
    Summative,
    /// SD and PD columns: topic tests and dated practice assessments.
    Test,
    Homework,
    HomeworkGraded,
    HomeworkReflection,
    /// EXT columns.
    Classwork,
    /// D columns.
    Diagnostic,
    /// LNT columns.
    BoardSolving,
    Consultation,
    /// TVARK/TAIS audit entries backing a profile attribute update.
    Tracking,
}

/// Sub-component bag for composite assessments. Cambridge sub-scores beyond
/// the bare one are keyed `cambridge_score_1`, `cambridge_score_2`, ... as
/// the KD family carries an arbitrary trailing index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDetails {
    pub percentage_score: Option<f64>,
    pub myp_score: Option<f64>,
    pub cambridge_score: Option<f64>,
    /// Higher-index Cambridge slots, `cambridge_score_<k>`. Explicit nulls
    /// from older exports survive a round-trip.
    #[serde(flatten)]
    pub cambridge_extras: BTreeMap<String, Option<f64>>,
}

impl EvaluationDetails {
    pub fn is_empty(&self) -> bool {
        self.percentage_score.is_none()
            && self.myp_score.is_none()
            && self.cambridge_score.is_none()
            && self.cambridge_extras.values().all(Option::is_none)
    }

    pub fn set_cambridge(&mut self, index: u32, value: f64) {
        if index == 0 {
            self.cambridge_score = Some(value);
        } else {
            self.cambridge_extras
                .insert(format!("cambridge_score_{}", index), Some(value));
        }
    }
}

/// One scored event. `(date, column)` is the duplicate key within a
/// student's assessment list; see [`StudentRecord::upsert_assessment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub date: NaiveDate,
    pub column: String,
    #[serde(rename = "type")]
    pub kind: AssessmentKind,
    pub task_name: String,
    pub score: String,
    #[serde(default)]
    pub comment: String,
    pub added: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_details: Option<EvaluationDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Homework on-time flag (0/1), carried on the composite ND record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_time: Option<u8>,
}

impl Assessment {
    pub fn new(
        date: NaiveDate,
        column: impl Into<String>,
        kind: AssessmentKind,
        task_name: impl Into<String>,
        score: impl Into<String>,
        added: NaiveDate,
    ) -> Self {
        Assessment {
            date,
            column: column.into(),
            kind,
            task_name: task_name.into(),
            score: score.into(),
            comment: String::new(),
            added,
            updated: None,
            evaluation_details: None,
            assessment_id: None,
            assessment_title: None,
            context: None,
            on_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveAttempt {
    pub score: Option<f64>,
    pub date: NaiveDate,
    /// Originating assessment column, e.g. "KD1 C2" or "PD3_2025-10-21".
    pub assessment: String,
}

/// Per-objective mastery state. `history` never loses entries; the current
/// score always tracks the chronologically latest entry, which is not
/// necessarily the last appended one (re-imports may arrive out of order).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveProgress {
    pub current_score: Option<f64>,
    pub last_updated: Option<NaiveDate>,
    #[serde(default)]
    pub history: Vec<ObjectiveAttempt>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSummary {
    pub total: usize,
    pub mastered: usize,
    pub partial: usize,
    pub not_mastered: usize,
    pub not_assessed: usize,
    pub last_full_update: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    NotStarted,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionAttempt {
    pub date: NaiveDate,
    pub score: Option<f64>,
    pub assessment_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub myp_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionObjective {
    pub objective_code: String,
    pub initial_score: Option<f64>,
    pub current_score: Option<f64>,
    pub target_score: f64,
    pub last_updated: Option<NaiveDate>,
    #[serde(default)]
    pub attempts: Vec<MissionAttempt>,
}

/// A tracked goal over one or more objective codes. Transitions only move
/// forward; regression from `completed` is policy-gated (see
/// [`crate::config::MissionPolicy`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub title: String,
    pub status: MissionStatus,
    pub created_date: NaiveDate,
    pub started_date: Option<NaiveDate>,
    pub completed_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub objectives: BTreeMap<String, MissionObjective>,
    pub missing_points_initial: f64,
    pub missing_points_current: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningLevel {
    NeedsSupport,
    Developing,
    Proficient,
    Advanced,
}

impl Default for LearningLevel {
    fn default() -> Self {
        LearningLevel::Developing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningAttributes {
    pub writing_quality: LearningLevel,
    pub notebook_organization: LearningLevel,
    pub reflective_practice: LearningLevel,
    pub math_communication: LearningLevel,
    pub seeks_tutoring: bool,
}

impl Default for LearningAttributes {
    fn default() -> Self {
        LearningAttributes {
            writing_quality: LearningLevel::Developing,
            notebook_organization: LearningLevel::Developing,
            reflective_practice: LearningLevel::Developing,
            math_communication: LearningLevel::Developing,
            seeks_tutoring: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileNotes {
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub language_profile: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub challenges: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub learning_attributes: LearningAttributes,
    #[serde(default)]
    pub notes: ProfileNotes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Academic {
    pub year: String,
    pub grade: u32,
    pub class_id: String,
    pub enrolled_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialCompletion {
    pub percentage: f64,
    pub last_updated: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurriculumProgress {
    #[serde(default)]
    pub cambridge_objectives: BTreeMap<String, ObjectiveProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cambridge_objectives_summary: Option<ObjectiveSummary>,
    #[serde(default)]
    pub material_completion: BTreeMap<String, MaterialCompletion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub month: String,
    pub absent_lessons: u32,
    pub authorized_absences: u32,
    pub report_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationRecord {
    pub date_invited: NaiveDate,
    pub date_attended: Option<NaiveDate>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub actions_taken: String,
    #[serde(default)]
    pub future_plans: String,
    pub added: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub attendance_records: Vec<AttendanceRecord>,
    #[serde(default)]
    pub attendance_notes: Vec<String>,
    #[serde(default)]
    pub consultations: Vec<ConsultationRecord>,
    #[serde(default)]
    pub social_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDate>,
}

/// One student's full record, owned by the store. Created lazily by the
/// orchestrator on first encounter of an identity, mutated on every
/// successful row pass, never deleted by this pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub class_name: String,
    #[serde(default)]
    pub academic: Academic,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
    #[serde(default)]
    pub curriculum_progress: CurriculumProgress,
    #[serde(default)]
    pub cambridge_missions: Vec<Mission>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl StudentRecord {
    /// Insert or update an assessment keyed by `(date, column)`.
    ///
    /// This is the only place duplicate avoidance is enforced; no other
    /// component may push onto `assessments` directly. On a key hit the new
    /// observation's fields are shallow-merged into the existing entry
    /// (empty comment / absent optionals keep what was there) and `updated`
    /// is stamped — but only when the merge actually changed something, so
    /// re-importing identical data leaves the record byte-identical.
    /// Returns true when a new entry was appended.
    pub fn upsert_assessment(&mut self, incoming: Assessment, today: NaiveDate) -> bool {
        if let Some(existing) = self
            .assessments
            .iter_mut()
            .find(|a| a.date == incoming.date && a.column == incoming.column)
        {
            let mut merged = existing.clone();
            merged.kind = incoming.kind;
            merged.task_name = incoming.task_name;
            merged.score = incoming.score;
            if !incoming.comment.is_empty() {
                merged.comment = incoming.comment;
            }
            if incoming.evaluation_details.is_some() {
                merged.evaluation_details = incoming.evaluation_details;
            }
            if incoming.assessment_id.is_some() {
                merged.assessment_id = incoming.assessment_id;
            }
            if incoming.assessment_title.is_some() {
                merged.assessment_title = incoming.assessment_title;
            }
            if incoming.context.is_some() {
                merged.context = incoming.context;
            }
            if incoming.on_time.is_some() {
                merged.on_time = incoming.on_time;
            }
            if merged != *existing {
                merged.updated = Some(today);
                *existing = merged;
            }
            return false;
        }

        self.assessments.push(incoming);
        true
    }
}
