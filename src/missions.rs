use crate::config::MissionPolicy;
use crate::model::{
    Mission, MissionAttempt, MissionObjective, MissionStatus, StudentRecord,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Points still missing toward a target. Unassessed objectives do not count
/// against a mission until evidence arrives.
pub fn missing_points(score: Option<f64>, target: f64) -> f64 {
    match score {
        Some(s) => (target - s).max(0.0),
        None => 0.0,
    }
}

/// Build a mission over the given objective codes, seeded from the
/// student's current mastery state. Codes without progress yet start
/// unassessed. The mission is created `not_started`; call [`start`].
pub fn create(
    student: &StudentRecord,
    objective_codes: &[&str],
    title: impl Into<String>,
    deadline: Option<NaiveDate>,
    today: NaiveDate,
) -> Mission {
    let mut objectives = BTreeMap::new();
    let mut total_missing = 0.0;

    for code in objective_codes {
        let progress = student.curriculum_progress.cambridge_objectives.get(*code);
        let current = progress.and_then(|p| p.current_score);
        let missing = missing_points(current, 1.0);
        total_missing += missing;

        objectives.insert(
            (*code).to_string(),
            MissionObjective {
                objective_code: (*code).to_string(),
                initial_score: current,
                current_score: current,
                target_score: 1.0,
                last_updated: progress.and_then(|p| p.last_updated),
                attempts: Vec::new(),
            },
        );
    }

    Mission {
        mission_id: format!("mission_{}", Uuid::new_v4()),
        title: title.into(),
        status: MissionStatus::NotStarted,
        created_date: today,
        started_date: None,
        completed_date: None,
        deadline,
        objectives,
        missing_points_initial: total_missing,
        missing_points_current: total_missing,
    }
}

pub fn start(mission: &mut Mission, today: NaiveDate) {
    mission.status = MissionStatus::InProgress;
    mission.started_date = Some(today);
}

pub fn cancel(mission: &mut Mission) {
    mission.status = MissionStatus::Cancelled;
}

/// Fold an objective-score update into every mission tracking that
/// objective. Only in-progress missions move; completed ones are touched
/// solely when the policy allows reopening.
#[allow(clippy::too_many_arguments)]
pub fn propagate(
    student: &mut StudentRecord,
    objective_code: &str,
    score: Option<f64>,
    date: NaiveDate,
    assessment_column: &str,
    points: Option<f64>,
    myp_level: Option<f64>,
    policy: MissionPolicy,
    today: NaiveDate,
) {
    for mission in &mut student.cambridge_missions {
        let eligible = match mission.status {
            MissionStatus::InProgress => true,
            MissionStatus::Completed => policy.reopen_completed,
            _ => false,
        };
        if !eligible || !mission.objectives.contains_key(objective_code) {
            continue;
        }

        apply_to_mission(
            mission,
            objective_code,
            score,
            date,
            assessment_column,
            points,
            myp_level,
        );

        if mission.status == MissionStatus::InProgress && is_satisfied(mission) {
            mission.status = MissionStatus::Completed;
            mission.completed_date = Some(today);
            tracing::info!("mission {:?} completed", mission.title);
        } else if mission.status == MissionStatus::Completed
            && policy.reopen_completed
            && mission.missing_points_current > 0.0
        {
            mission.status = MissionStatus::InProgress;
            mission.completed_date = None;
            tracing::warn!(
                "mission {:?} reopened: later evidence fell below target",
                mission.title
            );
        }
    }
}

fn apply_to_mission(
    mission: &mut Mission,
    objective_code: &str,
    score: Option<f64>,
    date: NaiveDate,
    assessment_column: &str,
    points: Option<f64>,
    myp_level: Option<f64>,
) {
    let Some(objective) = mission.objectives.get_mut(objective_code) else {
        return;
    };

    // Same (date, column) key as everywhere else: a re-import updates the
    // attempt instead of stacking a duplicate.
    match objective
        .attempts
        .iter_mut()
        .find(|a| a.date == date && a.assessment_column == assessment_column)
    {
        Some(existing) => {
            existing.score = score;
            existing.points = points;
            existing.myp_level = myp_level;
        }
        None => objective.attempts.push(MissionAttempt {
            date,
            score,
            assessment_column: assessment_column.to_string(),
            points,
            myp_level,
        }),
    }

    let latest = objective.attempts.iter().max_by_key(|a| a.date);
    objective.current_score = latest.and_then(|a| a.score);
    objective.last_updated = latest.map(|a| a.date);

    mission.missing_points_current = mission
        .objectives
        .values()
        .map(|o| missing_points(o.current_score, o.target_score))
        .sum();
}

/// Complete only on full evidence at target: every objective attempted and
/// nothing missing. Evidence below target leaves the mission in progress.
fn is_satisfied(mission: &Mission) -> bool {
    mission
        .objectives
        .values()
        .all(|o| !o.attempts.is_empty())
        && mission.missing_points_current == 0.0
}
