use super::model::{ClassKind, ClassRecord};
use super::step::exact_step_number;

const TRAINING_PREFIX: &str = "TRAINING";

/// Classifies a class record as a one-on-one session, a club activity, or
/// neither.
///
/// An explicit `SESSION`/`CLUB` tag always wins. Untagged (or `OTHER`-tagged)
/// legacy records fall back to their label: `TRAINING - ...` labels are
/// clubs, a bare `Step <N>` is a session.
pub fn classify(record: &ClassRecord) -> ClassKind {
    match record.kind {
        Some(ClassKind::Session) => return ClassKind::Session,
        Some(ClassKind::Club) => return ClassKind::Club,
        _ => {}
    }

    let Some(label) = record.step.as_deref() else {
        return ClassKind::Other;
    };
    if is_training_label(label) {
        ClassKind::Club
    } else if exact_step_number(label).is_some() {
        ClassKind::Session
    } else {
        ClassKind::Other
    }
}

pub fn is_successful(record: &ClassRecord) -> bool {
    record.attended || record.participated
}

fn is_training_label(label: &str) -> bool {
    let t = label.trim_start();
    let Some(head) = t.get(..TRAINING_PREFIX.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(TRAINING_PREFIX)
        && t[TRAINING_PREFIX.len()..].trim_start().starts_with('-')
}
