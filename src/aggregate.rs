use crate::columns::{classify, numeric_value, CellValue, ColumnFamily, ColumnPart};
use crate::config::{LegacyMeaning, PipelineConfig};
use crate::model::{Assessment, AssessmentKind, EvaluationDetails, LearningLevel};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Profile attribute driven by a tracking column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedAttribute {
    NotebookOrganization,
    ReflectivePractice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub attribute: TrackedAttribute,
    pub level: LearningLevel,
}

/// Raw accumulated sub-scores of one PD/KD observation, handed to the
/// curriculum engine before synthesis flattens them into one record.
#[derive(Debug, Clone, PartialEq)]
pub struct CurriculumEvent {
    pub family: ColumnFamily,
    /// Objective-map lookup key: "PD3", "KD1".
    pub base: String,
    /// Assessment column recorded in objective history, e.g.
    /// "PD3_2025-10-21" or "KD1".
    pub column: String,
    pub date: NaiveDate,
    /// Cambridge sub-scores by index; bare C is index 0.
    pub cambridge: BTreeMap<u32, f64>,
    pub points: Option<f64>,
    pub myp_level: Option<f64>,
}

/// Everything one student row folds down to.
#[derive(Debug, Clone, Default)]
pub struct RowAggregate {
    pub assessments: Vec<Assessment>,
    pub curriculum: Vec<CurriculumEvent>,
    pub profile: Vec<ProfileUpdate>,
    pub social_hours: Option<f64>,
}

#[derive(Debug, Default)]
struct NdScratch {
    on_time: Option<u8>,
    score: Option<f64>,
    date: Option<NaiveDate>,
}

#[derive(Debug, Default)]
struct SubScores {
    percentage: Option<f64>,
    myp: Option<f64>,
    cambridge: BTreeMap<u32, f64>,
    date: Option<NaiveDate>,
}

impl SubScores {
    fn is_empty(&self) -> bool {
        self.percentage.is_none() && self.myp.is_none() && self.cambridge.is_empty()
    }

    fn set(&mut self, part: ColumnPart, value: f64) {
        match part {
            ColumnPart::Percentage => self.percentage = Some(value),
            ColumnPart::Myp => self.myp = Some(value),
            ColumnPart::Cambridge(i) => {
                self.cambridge.insert(i, value);
            }
            ColumnPart::Comment | ColumnPart::Score => {}
        }
    }

    fn first_cambridge(&self) -> Option<f64> {
        self.cambridge.values().next().copied()
    }

    fn details(&self) -> EvaluationDetails {
        let mut d = EvaluationDetails {
            percentage_score: self.percentage,
            myp_score: self.myp,
            ..EvaluationDetails::default()
        };
        for (&i, &v) in &self.cambridge {
            d.set_cambridge(i, v);
        }
        d
    }
}

/// Fold one student's row into assessments, curriculum events and profile
/// updates. Three passes: comments first, sub-score collection second,
/// synthesis last. Columns outside the allow-list (when one is given) are
/// invisible to every pass.
pub fn aggregate_row(
    cells: &[(String, CellValue)],
    column_dates: &HashMap<String, NaiveDate>,
    column_context: &HashMap<String, String>,
    allow_list: Option<&HashSet<String>>,
    config: &PipelineConfig,
    today: NaiveDate,
) -> RowAggregate {
    let mut out = RowAggregate::default();

    let included = |column: &str| -> bool {
        if column == config.standard.first_name
            || column == config.standard.last_name
            || column == config.standard.id
        {
            return false;
        }
        allow_list.map_or(true, |allowed| allowed.contains(column))
    };

    let date_for = |column: &str| -> NaiveDate {
        column_dates.get(column).copied().unwrap_or(today)
    };

    // Pass 1: comments, keyed by the column they belong to.
    let mut comments: BTreeMap<String, String> = BTreeMap::new();
    for (column, value) in cells {
        if !included(column) {
            continue;
        }
        match classify(column) {
            Some(desc)
                if desc.family == ColumnFamily::Nd && desc.part == Some(ColumnPart::Comment) =>
            {
                if let Some(text) = value.as_text() {
                    comments.insert(desc.base_column(), text);
                }
            }
            None => {
                if let Some(LegacyMeaning::Comment { parent }) = config.legacy.get(column) {
                    if let Some(text) = value.as_text() {
                        comments.insert(parent.clone(), text);
                    }
                }
            }
            _ => {}
        }
    }

    // Pass 2: accumulate multi-part sub-scores per base column.
    let mut nd: BTreeMap<String, (u32, NdScratch)> = BTreeMap::new();
    let mut sd: BTreeMap<String, (u32, SubScores)> = BTreeMap::new();
    let mut kd: BTreeMap<String, (u32, SubScores)> = BTreeMap::new();
    let mut pd: BTreeMap<String, (u32, NaiveDate, SubScores)> = BTreeMap::new();

    for (column, value) in cells {
        if !included(column) {
            continue;
        }
        let Some(desc) = classify(column) else {
            continue;
        };
        match desc.family {
            ColumnFamily::Nd => {
                let entry = nd
                    .entry(desc.base_column())
                    .or_insert_with(|| (desc.instance, NdScratch::default()));
                let scratch = &mut entry.1;
                if scratch.date.is_none() {
                    scratch.date = Some(date_for(column));
                }
                match desc.part {
                    Some(ColumnPart::Comment) => {}
                    Some(ColumnPart::Score) => {
                        if let Some(v) = numeric_value(column, value) {
                            scratch.score = Some(v);
                        }
                    }
                    _ => {
                        if let Some(v) = numeric_value(column, value) {
                            scratch.on_time = Some(if v == 1.0 { 1 } else { 0 });
                        }
                    }
                }
            }
            ColumnFamily::Sd => {
                let Some(part) = desc.part else { continue };
                let entry = sd
                    .entry(desc.base_column())
                    .or_insert_with(|| (desc.instance, SubScores::default()));
                if entry.1.date.is_none() {
                    entry.1.date = Some(date_for(column));
                }
                if let Some(v) = numeric_value(column, value) {
                    entry.1.set(part, v);
                }
            }
            ColumnFamily::Kd => {
                let Some(part) = desc.part else { continue };
                let entry = kd
                    .entry(desc.base_column())
                    .or_insert_with(|| (desc.instance, SubScores::default()));
                if entry.1.date.is_none() {
                    entry.1.date = Some(date_for(column));
                }
                if let Some(v) = numeric_value(column, value) {
                    entry.1.set(part, v);
                }
            }
            ColumnFamily::Pd => {
                // The embedded date is part of the key: the same practice
                // assessment on another day is a separate event.
                let date = desc.embedded_date.unwrap_or_else(|| date_for(column));
                let entry = pd
                    .entry(desc.base_column())
                    .or_insert_with(|| (desc.instance, date, SubScores::default()));
                if let Some(v) = numeric_value(column, value) {
                    // A bare PD column is the Cambridge component.
                    let part = desc.part.unwrap_or(ColumnPart::Cambridge(0));
                    entry.2.set(part, v);
                }
            }
            _ => {}
        }
    }

    // Pass 3a: single-component columns emit directly.
    for (column, value) in cells {
        if !included(column) {
            continue;
        }
        match classify(column) {
            Some(desc) => match desc.family {
                ColumnFamily::Ext | ColumnFamily::Lnt | ColumnFamily::Diag => {
                    if value.is_sentinel() {
                        continue;
                    }
                    let (kind, task_name, tag) = match desc.family {
                        ColumnFamily::Ext => (
                            AssessmentKind::Classwork,
                            format!("EXT{}: Exercise Progress", desc.instance),
                            "ext",
                        ),
                        ColumnFamily::Lnt => (
                            AssessmentKind::BoardSolving,
                            format!("LNT{}: Board Participation", desc.instance),
                            "lnt",
                        ),
                        _ => (
                            AssessmentKind::Diagnostic,
                            format!("D{}: Diagnostic", desc.instance),
                            "d",
                        ),
                    };
                    let mut a = Assessment::new(
                        date_for(column),
                        column.clone(),
                        kind,
                        task_name,
                        value.display(),
                        today,
                    );
                    a.comment = comments.get(column).cloned().unwrap_or_default();
                    a.context = column_context.get(column).cloned();
                    a.assessment_id = Some(format!("{}{}", tag, desc.instance));
                    a.assessment_title = Some(column.clone());
                    out.assessments.push(a);
                }
                // A bare SD/KD without sub-columns is a single-component
                // observation of the same assessment.
                ColumnFamily::Sd if desc.part.is_none() => {
                    if value.is_sentinel() {
                        continue;
                    }
                    let mut a = Assessment::new(
                        date_for(column),
                        column.clone(),
                        AssessmentKind::Test,
                        format!("Test {}", desc.instance),
                        value.display(),
                        today,
                    );
                    a.context = column_context.get(column).cloned();
                    a.assessment_id = Some(format!("sd{}", desc.instance));
                    a.assessment_title = Some(column.clone());
                    out.assessments.push(a);
                }
                ColumnFamily::Kd if desc.part.is_none() => {
                    if value.is_sentinel() {
                        continue;
                    }
                    let mut a = Assessment::new(
                        date_for(column),
                        column.clone(),
                        AssessmentKind::Summative,
                        format!("KD{0}: Cambridge Unit {0}", desc.instance),
                        value.display(),
                        today,
                    );
                    a.context = column_context.get(column).cloned();
                    a.assessment_id = Some(format!("kd{}", desc.instance));
                    a.assessment_title = Some(column.clone());
                    out.assessments.push(a);
                }
                ColumnFamily::Tvark | ColumnFamily::Tais => {
                    if value.is_blank() {
                        continue;
                    }
                    let Some(v) = numeric_value(column, value) else {
                        continue;
                    };
                    let organized = v == 1.0;
                    let level = if organized {
                        LearningLevel::Proficient
                    } else {
                        LearningLevel::NeedsSupport
                    };
                    let is_tvark = desc.family == ColumnFamily::Tvark;
                    out.profile.push(ProfileUpdate {
                        attribute: if is_tvark {
                            TrackedAttribute::NotebookOrganization
                        } else {
                            TrackedAttribute::ReflectivePractice
                        },
                        level,
                    });

                    let date = date_for(column);
                    let (task, title, comment) = if is_tvark {
                        (
                            "Notebook Organization",
                            "Notebook Organization Check",
                            if organized {
                                "Notebook organized"
                            } else {
                                "Notebook needs organization"
                            },
                        )
                    } else {
                        (
                            "Corrections Practice",
                            "Corrections Practice Check",
                            if organized {
                                "Makes corrections"
                            } else {
                                "Does not make corrections"
                            },
                        )
                    };
                    let mut a = Assessment::new(
                        date,
                        column.clone(),
                        AssessmentKind::Tracking,
                        task,
                        format!("{}", v),
                        today,
                    );
                    a.comment = comment.into();
                    a.context = column_context.get(column).cloned();
                    a.assessment_id =
                        Some(format!("tracking-{}-{}", column.to_lowercase(), date));
                    a.assessment_title = Some(title.into());
                    out.assessments.push(a);
                }
                // Multi-part families were folded in pass 2.
                _ => {}
            },
            None => match config.legacy.get(column) {
                Some(LegacyMeaning::Comment { .. }) | None => {}
                Some(LegacyMeaning::SocialHours) => {
                    if let Some(v) = numeric_value(column, value) {
                        out.social_hours = Some(v);
                    }
                }
                Some(LegacyMeaning::Assessment { kind, task_name }) => {
                    if value.is_sentinel() {
                        continue;
                    }
                    let mut a = Assessment::new(
                        date_for(column),
                        column.clone(),
                        *kind,
                        task_name.clone(),
                        value.display(),
                        today,
                    );
                    a.comment = comments.get(column).cloned().unwrap_or_default();
                    a.context = column_context.get(column).cloned();
                    a.assessment_id = Some(column.to_lowercase().replace(' ', "-"));
                    a.assessment_title = Some(column.clone());
                    out.assessments.push(a);
                }
            },
        }
    }

    // Pass 3b: homework composites (on-time flag + score + comment).
    for (base, (instance, scratch)) in nd {
        if scratch.on_time.is_none() && scratch.score.is_none() {
            continue;
        }
        let kind = match instance {
            3 => AssessmentKind::HomeworkGraded,
            4 | 5 => AssessmentKind::HomeworkReflection,
            _ => AssessmentKind::Homework,
        };
        let mut a = Assessment::new(
            scratch.date.unwrap_or(today),
            base.clone(),
            kind,
            format!("{}: Homework", base),
            scratch.score.map(|v| format!("{}", v)).unwrap_or_default(),
            today,
        );
        a.comment = comments.get(&base).cloned().unwrap_or_default();
        a.context = column_context.get(&base).cloned();
        a.on_time = scratch.on_time;
        a.assessment_id = Some(format!("nd{}", instance));
        a.assessment_title = Some(base);
        out.assessments.push(a);
    }

    // Pass 3c: test composites. Primary score preference is percentage,
    // then MYP, then Cambridge.
    for (base, (instance, sub)) in sd {
        if sub.is_empty() {
            continue;
        }
        let primary = sub
            .percentage
            .or(sub.myp)
            .or_else(|| sub.first_cambridge())
            .unwrap_or(0.0);
        let mut a = Assessment::new(
            sub.date.unwrap_or(today),
            base.clone(),
            AssessmentKind::Test,
            format!("Test {}", instance),
            format!("{}", primary),
            today,
        );
        a.evaluation_details = Some(sub.details());
        a.context = column_context.get(&base).cloned();
        a.assessment_id = Some(format!("sd{}", instance));
        a.assessment_title = Some(base);
        out.assessments.push(a);
    }

    // Pass 3d: dated practice composites. These prefer the Cambridge score
    // as the primary value and feed the curriculum engine.
    for (base, (instance, date, sub)) in pd {
        if sub.is_empty() {
            continue;
        }
        let primary = sub
            .first_cambridge()
            .or(sub.percentage)
            .or(sub.myp)
            .unwrap_or(0.0);
        let mut a = Assessment::new(
            date,
            base.clone(),
            AssessmentKind::Test,
            format!("PD{}: Cambridge Practice", instance),
            format!("{}", primary),
            today,
        );
        a.evaluation_details = Some(sub.details());
        a.context = column_context.get(&base).cloned();
        a.assessment_id = Some(format!("pd{}", instance));
        a.assessment_title = Some(format!("PD{}", instance));
        out.assessments.push(a);

        if !sub.cambridge.is_empty() {
            out.curriculum.push(CurriculumEvent {
                family: ColumnFamily::Pd,
                base: format!("PD{}", instance),
                column: base,
                date,
                cambridge: sub.cambridge,
                points: sub.percentage,
                myp_level: sub.myp,
            });
        }
    }

    // Pass 3e: unit summative composites, Cambridge sub-scores kept by index
    // for per-objective propagation.
    for (base, (instance, sub)) in kd {
        if sub.is_empty() {
            continue;
        }
        let primary = sub
            .percentage
            .or(sub.myp)
            .or_else(|| sub.first_cambridge())
            .unwrap_or(0.0);
        let date = sub.date.unwrap_or(today);
        let mut a = Assessment::new(
            date,
            base.clone(),
            AssessmentKind::Summative,
            format!("KD{0}: Cambridge Unit {0}", instance),
            format!("{}", primary),
            today,
        );
        a.evaluation_details = Some(sub.details());
        a.context = column_context.get(&base).cloned();
        a.assessment_id = Some(format!("kd{}", instance));
        a.assessment_title = Some(base.clone());
        out.assessments.push(a);

        if !sub.cambridge.is_empty() {
            out.curriculum.push(CurriculumEvent {
                family: ColumnFamily::Kd,
                base: base.clone(),
                column: base,
                date,
                cambridge: sub.cambridge,
                points: sub.percentage,
                myp_level: sub.myp,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn cells(pairs: &[(&str, CellValue)]) -> Vec<(String, CellValue)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn run(cells: &[(String, CellValue)], config: &PipelineConfig) -> RowAggregate {
        let dates = HashMap::new();
        let context = HashMap::new();
        aggregate_row(cells, &dates, &context, None, config, d("2024-01-05"))
    }

    #[test]
    fn sd_sub_scores_merge_into_one_assessment() {
        let config = PipelineConfig::default();
        let row = cells(&[
            ("SD2 P", CellValue::Number(80.0)),
            ("SD2 MYP", CellValue::Number(6.0)),
            ("SD2 C", CellValue::Number(1.0)),
        ]);
        let out = run(&row, &config);

        assert_eq!(out.assessments.len(), 1);
        let a = &out.assessments[0];
        assert_eq!(a.column, "SD2");
        assert_eq!(a.kind, AssessmentKind::Test);
        assert_eq!(a.score, "80");
        let details = a.evaluation_details.as_ref().expect("details");
        assert_eq!(details.percentage_score, Some(80.0));
        assert_eq!(details.myp_score, Some(6.0));
        assert_eq!(details.cambridge_score, Some(1.0));
    }

    #[test]
    fn primary_score_prefers_percentage_then_myp_then_cambridge() {
        let config = PipelineConfig::default();

        let out = run(
            &cells(&[
                ("SD1 MYP", CellValue::Number(5.0)),
                ("SD1 C", CellValue::Number(0.5)),
            ]),
            &config,
        );
        assert_eq!(out.assessments[0].score, "5");

        let out = run(&cells(&[("SD1 C1", CellValue::Number(0.5))]), &config);
        assert_eq!(out.assessments[0].score, "0.5");
    }

    #[test]
    fn sentinel_sub_scores_are_skipped_not_fatal() {
        let config = PipelineConfig::default();
        let out = run(
            &cells(&[
                ("SD3 P", CellValue::Text("n".into())),
                ("SD3 MYP", CellValue::Text("?".into())),
                ("SD3 C", CellValue::Number(1.0)),
            ]),
            &config,
        );
        assert_eq!(out.assessments.len(), 1);
        assert_eq!(out.assessments[0].score, "1");
        let details = out.assessments[0].evaluation_details.as_ref().unwrap();
        assert_eq!(details.percentage_score, None);
        assert_eq!(details.myp_score, None);
    }

    #[test]
    fn nd_parts_fold_into_one_homework_record() {
        let config = PipelineConfig::default();
        let row = cells(&[
            ("ND3", CellValue::Number(1.0)),
            ("ND3 T", CellValue::Number(8.0)),
            ("ND3 K", CellValue::Text("redo question 4".into())),
        ]);
        let out = run(&row, &config);

        assert_eq!(out.assessments.len(), 1);
        let a = &out.assessments[0];
        assert_eq!(a.column, "ND3");
        assert_eq!(a.kind, AssessmentKind::HomeworkGraded);
        assert_eq!(a.score, "8");
        assert_eq!(a.on_time, Some(1));
        assert_eq!(a.comment, "redo question 4");
    }

    #[test]
    fn nd_instance_drives_homework_kind() {
        let config = PipelineConfig::default();
        let out = run(
            &cells(&[
                ("ND1", CellValue::Number(1.0)),
                ("ND4", CellValue::Number(0.0)),
                ("ND5", CellValue::Number(1.0)),
            ]),
            &config,
        );
        let kind_of = |col: &str| {
            out.assessments
                .iter()
                .find(|a| a.column == col)
                .map(|a| a.kind)
                .unwrap()
        };
        assert_eq!(kind_of("ND1"), AssessmentKind::Homework);
        assert_eq!(kind_of("ND4"), AssessmentKind::HomeworkReflection);
        assert_eq!(kind_of("ND5"), AssessmentKind::HomeworkReflection);
    }

    #[test]
    fn bare_pd_value_is_the_cambridge_component() {
        let config = PipelineConfig::default();
        let out = run(
            &cells(&[("PD3_2025-10-21", CellValue::Number(0.5))]),
            &config,
        );

        assert_eq!(out.assessments.len(), 1);
        let a = &out.assessments[0];
        assert_eq!(a.column, "PD3_2025-10-21");
        assert_eq!(a.date, d("2025-10-21"));
        assert_eq!(a.score, "0.5");
        assert_eq!(
            a.evaluation_details.as_ref().unwrap().cambridge_score,
            Some(0.5)
        );

        assert_eq!(out.curriculum.len(), 1);
        let ev = &out.curriculum[0];
        assert_eq!(ev.base, "PD3");
        assert_eq!(ev.column, "PD3_2025-10-21");
        assert_eq!(ev.cambridge.get(&0), Some(&0.5));
    }

    #[test]
    fn kd_keeps_cambridge_scores_by_index() {
        let config = PipelineConfig::default();
        let out = run(
            &cells(&[
                ("KD1 P", CellValue::Number(72.0)),
                ("KD1 C1", CellValue::Number(1.0)),
                ("KD1 C2", CellValue::Number(0.0)),
                ("KD1 C3", CellValue::Number(0.5)),
            ]),
            &config,
        );

        assert_eq!(out.assessments.len(), 1);
        let a = &out.assessments[0];
        assert_eq!(a.kind, AssessmentKind::Summative);
        assert_eq!(a.score, "72");
        let details = a.evaluation_details.as_ref().unwrap();
        assert_eq!(
            details.cambridge_extras.get("cambridge_score_3"),
            Some(&Some(0.5))
        );

        let ev = &out.curriculum[0];
        assert_eq!(ev.cambridge.len(), 3);
        assert_eq!(ev.cambridge.get(&3), Some(&0.5));
    }

    #[test]
    fn tracking_columns_update_profile_and_record_audit_entry() {
        let config = PipelineConfig::default();
        let out = run(
            &cells(&[
                ("TVARK", CellValue::Number(1.0)),
                ("TAIS", CellValue::Number(0.0)),
            ]),
            &config,
        );

        assert_eq!(out.profile.len(), 2);
        assert!(out.profile.contains(&ProfileUpdate {
            attribute: TrackedAttribute::NotebookOrganization,
            level: LearningLevel::Proficient,
        }));
        assert!(out.profile.contains(&ProfileUpdate {
            attribute: TrackedAttribute::ReflectivePractice,
            level: LearningLevel::NeedsSupport,
        }));

        let tracking: Vec<_> = out
            .assessments
            .iter()
            .filter(|a| a.kind == AssessmentKind::Tracking)
            .collect();
        assert_eq!(tracking.len(), 2);
    }

    #[test]
    fn legacy_static_columns_still_process() {
        let mut config = PipelineConfig::default();
        config.legacy.add("SOC", LegacyMeaning::SocialHours);
        config.legacy.add(
            "KONS1",
            LegacyMeaning::Assessment {
                kind: AssessmentKind::Consultation,
                task_name: "Consultation attendance".into(),
            },
        );
        config.legacy.add(
            "KONS1 K",
            LegacyMeaning::Comment {
                parent: "KONS1".into(),
            },
        );

        let out = run(
            &cells(&[
                ("SOC", CellValue::Number(4.0)),
                ("KONS1", CellValue::Number(1.0)),
                ("KONS1 K", CellValue::Text("came prepared".into())),
            ]),
            &config,
        );

        assert_eq!(out.social_hours, Some(4.0));
        assert_eq!(out.assessments.len(), 1);
        let a = &out.assessments[0];
        assert_eq!(a.kind, AssessmentKind::Consultation);
        assert_eq!(a.comment, "came prepared");
    }

    #[test]
    fn allow_list_hides_columns_from_every_pass() {
        let config = PipelineConfig::default();
        let allow: HashSet<String> = ["EXT1".to_string()].into();
        let row = cells(&[
            ("EXT1", CellValue::Number(5.0)),
            ("SD2 P", CellValue::Number(80.0)),
            ("ND1", CellValue::Number(1.0)),
        ]);
        let dates = HashMap::new();
        let context = HashMap::new();
        let out = aggregate_row(&row, &dates, &context, Some(&allow), &config, d("2024-01-05"));

        assert_eq!(out.assessments.len(), 1);
        assert_eq!(out.assessments[0].column, "EXT1");
    }

    #[test]
    fn header_context_lands_on_the_composite() {
        let config = PipelineConfig::default();
        let row = cells(&[("SD1 P", CellValue::Number(60.0))]);
        let dates = HashMap::new();
        let mut context = HashMap::new();
        context.insert("SD1".to_string(), "retake of the fractions test".to_string());
        let out = aggregate_row(&row, &dates, &context, None, &config, d("2024-01-05"));

        assert_eq!(
            out.assessments[0].context.as_deref(),
            Some("retake of the fractions test")
        );
    }
}
