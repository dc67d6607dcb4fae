use super::classify::{classify, is_successful};
use super::error::ProgressionError;
use super::model::{ClassKind, ClassRecord};
use super::step::{is_jump_step, parse_step_number};
use super::store::ProgressStore;
use serde::Serialize;

pub const REQUIRED_SESSIONS: usize = 2;
pub const REQUIRED_CLUBS: usize = 1;

/// Breakdown of one completion decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvaluation {
    pub step_number: Option<u32>,
    pub jump_step: bool,
    #[serde(rename = "override")]
    pub override_value: Option<bool>,
    pub attempts: usize,
    pub successful_sessions: usize,
    pub successful_clubs: usize,
    pub vetoed: bool,
    pub complete: bool,
}

/// Pure completion rule over a student's records for one level.
///
/// An override is final. Otherwise only records whose own step number equals
/// the target's count; any `failed_jump` among them vetoes the step. Jump
/// steps need one attempt, regular steps need two successful sessions and one
/// successful club.
pub fn evaluate_step(
    step: &str,
    records: &[ClassRecord],
    override_value: Option<bool>,
) -> StepEvaluation {
    let step_number = parse_step_number(step);
    let jump_step = is_jump_step(step);

    if let Some(v) = override_value {
        return StepEvaluation {
            step_number,
            jump_step,
            override_value: Some(v),
            complete: v,
            ..Default::default()
        };
    }

    let Some(target) = step_number else {
        return StepEvaluation::default();
    };

    let matching: Vec<&ClassRecord> = records
        .iter()
        .filter(|r| r.step.as_deref().and_then(parse_step_number) == Some(target))
        .collect();

    let vetoed = matching.iter().any(|r| r.failed_jump);
    let mut successful_sessions = 0;
    let mut successful_clubs = 0;
    for r in matching.iter().filter(|r| is_successful(r)) {
        match classify(r) {
            ClassKind::Session => successful_sessions += 1,
            ClassKind::Club => successful_clubs += 1,
            ClassKind::Other => {}
        }
    }

    let criteria_met = if jump_step {
        !matching.is_empty()
    } else {
        successful_sessions >= REQUIRED_SESSIONS && successful_clubs >= REQUIRED_CLUBS
    };

    StepEvaluation {
        step_number,
        jump_step,
        override_value: None,
        attempts: matching.len(),
        successful_sessions,
        successful_clubs,
        vetoed,
        complete: criteria_met && !vetoed,
    }
}

/// Consults the override first and only loads class records when the
/// computed rule has to run.
pub fn evaluate_step_for<S: ProgressStore + ?Sized>(
    store: &S,
    student_id: &str,
    level: &str,
    step: &str,
    override_key: &str,
) -> Result<StepEvaluation, ProgressionError> {
    if let Some(v) = store.override_for(override_key, step)? {
        return Ok(evaluate_step(step, &[], Some(v)));
    }
    if parse_step_number(step).is_none() {
        return Ok(StepEvaluation::default());
    }
    let records = store.class_records_for(student_id, level)?;
    Ok(evaluate_step(step, &records, None))
}

pub fn is_step_complete<S: ProgressStore + ?Sized>(
    store: &S,
    student_id: &str,
    level: &str,
    step: &str,
    override_key: &str,
) -> Result<bool, ProgressionError> {
    evaluate_step_for(store, student_id, level, step, override_key).map(|e| e.complete)
}
