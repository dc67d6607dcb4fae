use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Primary,
    Parallel,
}

impl Track {
    pub fn as_str(self) -> &'static str {
        match self {
            Track::Primary => "primary",
            Track::Parallel => "parallel",
        }
    }

    /// `(level, step)` column names holding this track in both progress tables.
    pub fn columns(self) -> (&'static str, &'static str) {
        match self {
            Track::Primary => ("level", "step"),
            Track::Parallel => ("parallel_level", "parallel_step"),
        }
    }

    pub fn for_level(is_parallel: bool) -> Self {
        if is_parallel {
            Track::Parallel
        } else {
            Track::Primary
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassKind {
    Session,
    Club,
    Other,
}

impl ClassKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassKind::Session => "SESSION",
            ClassKind::Club => "CLUB",
            ClassKind::Other => "OTHER",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "SESSION" => Some(ClassKind::Session),
            "CLUB" => Some(ClassKind::Club),
            "OTHER" => Some(ClassKind::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub level: String,
    pub step: String,
}

impl Position {
    pub fn new(level: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            step: step.into(),
        }
    }
}

/// A student's current assignment, read from the academic record and joined
/// with the linked account (the canonical identity) when one exists.
#[derive(Debug, Clone, Default)]
pub struct StudentProgressState {
    pub student_id: String,
    pub account_id: Option<String>,
    pub contact: Option<String>,
    pub level: Option<String>,
    pub step: Option<String>,
    pub parallel_level: Option<String>,
    pub parallel_step: Option<String>,
}

impl StudentProgressState {
    pub fn position(&self, track: Track) -> Option<Position> {
        let (level, step) = match track {
            Track::Primary => (&self.level, &self.step),
            Track::Parallel => (&self.parallel_level, &self.parallel_step),
        };
        match (level, step) {
            (Some(l), Some(s)) => Some(Position::new(l.as_str(), s.as_str())),
            _ => None,
        }
    }

    /// The track whose current `(level, step)` is exactly the given pair.
    pub fn track_at(&self, level: &str, step: &str) -> Option<Track> {
        [Track::Primary, Track::Parallel].into_iter().find(|t| {
            self.position(*t)
                .map(|p| p.level == level && p.step == step)
                .unwrap_or(false)
        })
    }

    /// Overrides are keyed by the account when it is a distinct record.
    pub fn override_key(&self) -> &str {
        match self.account_id.as_deref() {
            Some(account_id) if account_id != self.student_id => account_id,
            _ => &self.student_id,
        }
    }
}

/// One evaluated activity. `attended` is already normalized from the
/// authoritative flag and the legacy duplicate when the row is read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassRecord {
    pub id: String,
    pub student_id: String,
    pub level: Option<String>,
    pub step: Option<String>,
    pub kind: Option<ClassKind>,
    pub attended: bool,
    pub participated: bool,
    pub failed_jump: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepCatalogEntry {
    pub level_code: String,
    pub steps: Vec<String>,
    pub clubs: BTreeSet<String>,
    pub is_parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    pub student_id: String,
    pub track: Track,
    pub from: Option<Position>,
    pub to: Position,
    pub class_record_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graduation {
    pub student_id: String,
    pub contact: Option<String>,
    pub track: Track,
    pub from: Position,
    pub class_record_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressionOutcome {
    Advanced {
        from: Position,
        to: Position,
        track: Track,
    },
    Graduated {
        from: Position,
        track: Track,
    },
}

impl ProgressionOutcome {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ProgressionOutcome::Advanced { from, to, track } => json!({
                "advanced": true,
                "from": from,
                "to": to,
                "track": track,
            }),
            ProgressionOutcome::Graduated { from, track } => json!({
                "advanced": false,
                "graduated": true,
                "from": from,
                "track": track,
            }),
        }
    }
}
