use crate::aggregate::CurriculumEvent;
use crate::columns::ColumnFamily;
use crate::config::{MissionPolicy, ObjectiveMap};
use crate::missions;
use crate::model::{ObjectiveAttempt, ObjectiveProgress, ObjectiveSummary, StudentRecord};
use chrono::NaiveDate;

/// Apply one PD/KD sub-score event to the student's objective mastery model
/// and mission state. Families other than PD/KD carry no curriculum signal.
pub fn apply_event(
    student: &mut StudentRecord,
    event: &CurriculumEvent,
    objectives: &ObjectiveMap,
    policy: MissionPolicy,
    today: NaiveDate,
) {
    let codes = objectives.objectives_for(&event.base);
    if codes.is_empty() {
        tracing::warn!("no curriculum objectives mapped for {}", event.base);
        return;
    }

    match event.family {
        // A practice assessment evidences every objective it is mapped to
        // with its single Cambridge score.
        ColumnFamily::Pd => {
            let Some(&score) = event.cambridge.get(&0) else {
                return;
            };
            for code in codes {
                record_attempt(student, code, Some(score), event.date, &event.column);
                missions::propagate(
                    student,
                    code,
                    Some(score),
                    event.date,
                    &event.column,
                    event.points,
                    event.myp_level,
                    policy,
                    today,
                );
            }
        }
        // Unit summatives carry one Cambridge score per objective: C maps to
        // the first listed objective, C<k> to the (k-1)-th.
        ColumnFamily::Kd => {
            for (&index, &score) in &event.cambridge {
                let objective_index = if index == 0 { 0 } else { (index - 1) as usize };
                let Some(code) = codes.get(objective_index) else {
                    tracing::warn!(
                        "{} C{} has no matching objective ({} mapped); dropping",
                        event.base,
                        index,
                        codes.len()
                    );
                    continue;
                };
                let column = if index == 0 {
                    format!("{} C", event.base)
                } else {
                    format!("{} C{}", event.base, index)
                };
                record_attempt(student, code, Some(score), event.date, &column);
                missions::propagate(
                    student,
                    code,
                    Some(score),
                    event.date,
                    &column,
                    event.points,
                    event.myp_level,
                    policy,
                    today,
                );
            }
        }
        _ => {}
    }
}

/// Upsert one history entry, keyed by (date, assessment column), then
/// recompute the headline score from the chronologically latest entry. The
/// key makes re-imports of the same sheet a no-op instead of history growth.
pub fn record_attempt(
    student: &mut StudentRecord,
    code: &str,
    score: Option<f64>,
    date: NaiveDate,
    column: &str,
) {
    let progress = student
        .curriculum_progress
        .cambridge_objectives
        .entry(code.to_string())
        .or_default();

    match progress
        .history
        .iter_mut()
        .find(|h| h.date == date && h.assessment == column)
    {
        Some(existing) => existing.score = score,
        None => progress.history.push(ObjectiveAttempt {
            score,
            date,
            assessment: column.to_string(),
        }),
    }

    recompute_current(progress);
}

/// `current_score` follows the latest-dated history entry — not the last
/// appended one, since re-imports may arrive out of chronological order.
fn recompute_current(progress: &mut ObjectiveProgress) {
    let latest = progress.history.iter().max_by_key(|h| h.date);
    progress.current_score = latest.and_then(|h| h.score);
    progress.last_updated = latest.map(|h| h.date);
}

/// Rebuild the per-student objective rollup from scratch. Always derived,
/// never carried forward from a previous run or schema version.
pub fn recompute_objective_summary(student: &mut StudentRecord) {
    let objectives = &student.curriculum_progress.cambridge_objectives;
    if objectives.is_empty() {
        return;
    }

    let mut summary = ObjectiveSummary {
        total: objectives.len(),
        ..ObjectiveSummary::default()
    };

    for progress in objectives.values() {
        match progress.current_score {
            None => summary.not_assessed += 1,
            Some(s) if s >= 1.0 => summary.mastered += 1,
            Some(s) if s > 0.0 => summary.partial += 1,
            Some(_) => summary.not_mastered += 1,
        }
        if let Some(updated) = progress.last_updated {
            summary.last_full_update = Some(match summary.last_full_update {
                Some(prev) if prev >= updated => prev,
                _ => updated,
            });
        }
    }

    student.curriculum_progress.cambridge_objectives_summary = Some(summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Academic, CurriculumProgress, Engagement, Profile, RecordMetadata, StudentRecord,
    };
    use std::collections::BTreeMap;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn student() -> StudentRecord {
        StudentRecord {
            id: "ST00001".into(),
            first_name: "Jonas".into(),
            last_name: "Petraitis".into(),
            class_name: "8A".into(),
            academic: Academic::default(),
            profile: Profile::default(),
            assessments: Vec::new(),
            curriculum_progress: CurriculumProgress::default(),
            cambridge_missions: Vec::new(),
            engagement: Engagement::default(),
            metadata: RecordMetadata::default(),
        }
    }

    #[test]
    fn current_score_tracks_latest_date_not_insertion_order() {
        let mut s = student();
        record_attempt(&mut s, "9Ni.01", Some(0.5), d("2024-01-01"), "PD1_2024-01-01");
        record_attempt(&mut s, "9Ni.01", Some(1.0), d("2023-12-01"), "PD1_2023-12-01");

        let progress = &s.curriculum_progress.cambridge_objectives["9Ni.01"];
        assert_eq!(progress.history.len(), 2);
        assert_eq!(progress.current_score, Some(0.5));
        assert_eq!(progress.last_updated, Some(d("2024-01-01")));
    }

    #[test]
    fn repeated_attempt_updates_in_place() {
        let mut s = student();
        record_attempt(&mut s, "9Ni.01", Some(0.5), d("2024-01-01"), "KD1 C1");
        record_attempt(&mut s, "9Ni.01", Some(0.5), d("2024-01-01"), "KD1 C1");
        record_attempt(&mut s, "9Ni.01", Some(1.0), d("2024-01-01"), "KD1 C1");

        let progress = &s.curriculum_progress.cambridge_objectives["9Ni.01"];
        assert_eq!(progress.history.len(), 1);
        assert_eq!(progress.current_score, Some(1.0));
    }

    #[test]
    fn kd_event_maps_indices_to_listed_objectives() {
        let mut s = student();
        let mut map = ObjectiveMap::new();
        map.add("KD1", &["9Ni.01", "9Ni.02"]);

        let mut cambridge = BTreeMap::new();
        cambridge.insert(1, 1.0);
        cambridge.insert(2, 0.0);
        cambridge.insert(3, 0.5); // no third objective mapped; dropped

        let event = CurriculumEvent {
            family: ColumnFamily::Kd,
            base: "KD1".into(),
            column: "KD1".into(),
            date: d("2024-02-01"),
            cambridge,
            points: Some(70.0),
            myp_level: None,
        };
        apply_event(&mut s, &event, &map, MissionPolicy::default(), d("2024-02-02"));

        let objectives = &s.curriculum_progress.cambridge_objectives;
        assert_eq!(objectives.len(), 2);
        assert_eq!(objectives["9Ni.01"].current_score, Some(1.0));
        assert_eq!(objectives["9Ni.02"].current_score, Some(0.0));
        assert_eq!(objectives["9Ni.01"].history[0].assessment, "KD1 C1");
    }

    #[test]
    fn pd_event_fans_one_score_to_every_mapped_objective() {
        let mut s = student();
        let mut map = ObjectiveMap::new();
        map.add("PD3", &["9Ae.01", "9Ae.02"]);

        let mut cambridge = BTreeMap::new();
        cambridge.insert(0, 0.5);
        let event = CurriculumEvent {
            family: ColumnFamily::Pd,
            base: "PD3".into(),
            column: "PD3_2024-03-01".into(),
            date: d("2024-03-01"),
            cambridge,
            points: None,
            myp_level: None,
        };
        apply_event(&mut s, &event, &map, MissionPolicy::default(), d("2024-03-02"));

        let objectives = &s.curriculum_progress.cambridge_objectives;
        assert_eq!(objectives["9Ae.01"].current_score, Some(0.5));
        assert_eq!(objectives["9Ae.02"].current_score, Some(0.5));
    }

    #[test]
    fn summary_counts_mastery_bands() {
        let mut s = student();
        record_attempt(&mut s, "9Ni.01", Some(1.0), d("2024-01-01"), "KD1 C1");
        record_attempt(&mut s, "9Ni.02", Some(0.5), d("2024-01-02"), "KD1 C2");
        record_attempt(&mut s, "9Ni.03", Some(0.0), d("2024-01-03"), "KD1 C3");
        s.curriculum_progress
            .cambridge_objectives
            .insert("9Ni.04".into(), ObjectiveProgress::default());

        recompute_objective_summary(&mut s);
        let summary = s
            .curriculum_progress
            .cambridge_objectives_summary
            .as_ref()
            .expect("summary");
        assert_eq!(summary.total, 4);
        assert_eq!(summary.mastered, 1);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.not_mastered, 1);
        assert_eq!(summary.not_assessed, 1);
        assert_eq!(summary.last_full_update, Some(d("2024-01-03")));
    }
}
