use super::catalog::StepCatalog;
use super::error::ProgressionError;
use super::model::{
    Advancement, ClassKind, ClassRecord, Graduation, Position, StepCatalogEntry,
    StudentProgressState, Track,
};
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Everything the progression engine reads from and writes to.
pub trait ProgressStore {
    fn class_record(&self, id: &str) -> Result<Option<ClassRecord>, ProgressionError>;

    fn student_progress(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentProgressState>, ProgressionError>;

    fn class_records_for(
        &self,
        student_id: &str,
        level: &str,
    ) -> Result<Vec<ClassRecord>, ProgressionError>;

    fn override_for(&self, student_key: &str, step: &str)
        -> Result<Option<bool>, ProgressionError>;

    fn catalog(&self) -> Result<StepCatalog, ProgressionError>;

    /// Moves one track to `to` in every progress representation, or in none.
    fn advance(&self, advancement: &Advancement) -> Result<(), ProgressionError>;

    /// Revokes the login credential and records the terminal event.
    fn graduate(&self, graduation: &Graduation) -> Result<(), ProgressionError>;
}

pub struct SqliteProgressStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteProgressStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

const CLASS_RECORD_COLUMNS: &str =
    "id, student_id, level, step, kind, attended, present, participated, failed_jump";

fn class_record_from_row(r: &Row<'_>) -> rusqlite::Result<ClassRecord> {
    let kind: Option<String> = r.get(4)?;
    let attended: Option<i64> = r.get(5)?;
    let present: Option<i64> = r.get(6)?;
    Ok(ClassRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        level: non_empty(r.get(2)?),
        step: non_empty(r.get(3)?),
        kind: kind.as_deref().and_then(ClassKind::from_tag),
        // The explicit flag is authoritative; `present` only fills a gap.
        attended: attended.or(present).map(|v| v != 0).unwrap_or(false),
        participated: r.get::<_, i64>(7)? != 0,
        failed_jump: r.get::<_, i64>(8)? != 0,
    })
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Writes one track of a student into both progress tables. Returns the
/// number of academic records touched (0 when the student is gone).
pub(crate) fn write_track(
    conn: &Connection,
    student_id: &str,
    track: Track,
    to: &Position,
    updated_at: &str,
) -> rusqlite::Result<usize> {
    let (level_col, step_col) = track.columns();
    let changed = conn.execute(
        &format!(
            "UPDATE students SET {} = ?, {} = ?, updated_at = ? WHERE id = ?",
            level_col, step_col
        ),
        (&to.level, &to.step, updated_at, student_id),
    )?;
    // Students without a login profile have nothing to mirror.
    conn.execute(
        &format!(
            "UPDATE accounts SET {} = ?, {} = ?, updated_at = ? WHERE student_id = ?",
            level_col, step_col
        ),
        (&to.level, &to.step, updated_at, student_id),
    )?;
    Ok(changed)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_event(
    conn: &Connection,
    student_id: &str,
    kind: &str,
    track: Track,
    from: Option<&Position>,
    to: Option<&Position>,
    class_record_id: Option<&str>,
    created_at: &str,
) -> rusqlite::Result<String> {
    let event_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO progress_events(id, student_id, kind, class_record_id, from_level, from_step, to_level, to_step, track, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &event_id,
            student_id,
            kind,
            class_record_id,
            from.map(|p| p.level.as_str()),
            from.map(|p| p.step.as_str()),
            to.map(|p| p.level.as_str()),
            to.map(|p| p.step.as_str()),
            track.as_str(),
            created_at,
        ),
    )?;
    Ok(event_id)
}

fn current_position(
    conn: &Connection,
    student_id: &str,
    track: Track,
) -> rusqlite::Result<Option<(Option<String>, Option<String>)>> {
    let (level_col, step_col) = track.columns();
    conn.query_row(
        &format!("SELECT {}, {} FROM students WHERE id = ?", level_col, step_col),
        [student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
}

impl ProgressStore for SqliteProgressStore<'_> {
    fn class_record(&self, id: &str) -> Result<Option<ClassRecord>, ProgressionError> {
        let sql = format!(
            "SELECT {} FROM class_records WHERE id = ?",
            CLASS_RECORD_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, [id], class_record_from_row)
            .optional()?)
    }

    fn student_progress(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentProgressState>, ProgressionError> {
        Ok(self
            .conn
            .query_row(
                "SELECT s.id, s.email, s.level, s.step, s.parallel_level, s.parallel_step,
                        a.id, a.email
                 FROM students s
                 LEFT JOIN accounts a ON a.student_id = s.id
                 WHERE s.id = ?",
                [student_id],
                |r| {
                    let student_email: Option<String> = r.get(1)?;
                    let account_email: Option<String> = r.get(7)?;
                    Ok(StudentProgressState {
                        student_id: r.get(0)?,
                        account_id: r.get(6)?,
                        contact: non_empty(account_email).or(non_empty(student_email)),
                        level: non_empty(r.get(2)?),
                        step: non_empty(r.get(3)?),
                        parallel_level: non_empty(r.get(4)?),
                        parallel_step: non_empty(r.get(5)?),
                    })
                },
            )
            .optional()?)
    }

    fn class_records_for(
        &self,
        student_id: &str,
        level: &str,
    ) -> Result<Vec<ClassRecord>, ProgressionError> {
        let sql = format!(
            "SELECT {} FROM class_records
             WHERE student_id = ? AND level = ?
             ORDER BY created_at, rowid",
            CLASS_RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map((student_id, level), class_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn override_for(
        &self,
        student_key: &str,
        step: &str,
    ) -> Result<Option<bool>, ProgressionError> {
        Ok(self
            .conn
            .query_row(
                "SELECT is_completed FROM progress_overrides WHERE student_key = ? AND step = ?",
                (student_key, step),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v != 0))
    }

    fn catalog(&self) -> Result<StepCatalog, ProgressionError> {
        let mut steps_by_level: HashMap<String, Vec<String>> = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT level_code, label FROM level_steps ORDER BY level_code, idx")?;
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            let code: String = r.get(0)?;
            steps_by_level.entry(code).or_default().push(r.get(1)?);
        }

        let mut clubs_by_level: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT level_code, label FROM level_clubs")?;
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            let code: String = r.get(0)?;
            clubs_by_level.entry(code).or_default().insert(r.get(1)?);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT code, is_parallel FROM levels ORDER BY sort_order, code")?;
        let entries = stmt
            .query_map([], |r| {
                let code: String = r.get(0)?;
                let is_parallel: i64 = r.get(1)?;
                Ok((code, is_parallel != 0))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(code, is_parallel)| StepCatalogEntry {
                steps: steps_by_level.remove(&code).unwrap_or_default(),
                clubs: clubs_by_level.remove(&code).unwrap_or_default(),
                level_code: code,
                is_parallel,
            })
            .collect();

        Ok(StepCatalog::new(entries))
    }

    fn advance(&self, advancement: &Advancement) -> Result<(), ProgressionError> {
        let tx = self.conn.unchecked_transaction()?;

        let current = current_position(&tx, &advancement.student_id, advancement.track)?
            .ok_or_else(|| ProgressionError::StudentNotFound(advancement.student_id.clone()))?;
        if current.0.as_deref() == Some(advancement.to.level.as_str())
            && current.1.as_deref() == Some(advancement.to.step.as_str())
        {
            debug!(
                student_id = %advancement.student_id,
                level = %advancement.to.level,
                step = %advancement.to.step,
                "student already at target; nothing to write"
            );
            return Ok(());
        }

        let now = now_rfc3339();
        write_track(
            &tx,
            &advancement.student_id,
            advancement.track,
            &advancement.to,
            &now,
        )?;
        insert_event(
            &tx,
            &advancement.student_id,
            "advanced",
            advancement.track,
            advancement.from.as_ref(),
            Some(&advancement.to),
            advancement.class_record_id.as_deref(),
            &now,
        )?;
        tx.commit()?;
        Ok(())
    }

    fn graduate(&self, graduation: &Graduation) -> Result<(), ProgressionError> {
        let tx = self.conn.unchecked_transaction()?;
        if let Some(email) = graduation.contact.as_deref() {
            let removed = tx.execute("DELETE FROM credentials WHERE email = ?", [email])?;
            debug!(
                student_id = %graduation.student_id,
                removed,
                "credential revocation"
            );
        }
        insert_event(
            &tx,
            &graduation.student_id,
            "graduated",
            graduation.track,
            Some(&graduation.from),
            None,
            graduation.class_record_id.as_deref(),
            &now_rfc3339(),
        )?;
        tx.commit()?;
        Ok(())
    }
}
