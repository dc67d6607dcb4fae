use super::error::ProgressionError;
use super::evaluate::is_step_complete;
use super::model::{Advancement, Graduation, Position, ProgressionOutcome, Track};
use super::step::{next_step_label, parse_step_number};
use super::store::ProgressStore;
use tracing::{debug, info};

/// Orientation track; never evaluated.
pub const ORIENTATION_LEVEL: &str = "ESS";
/// Placeholder step of the orientation track.
pub const WELCOME_STEP: &str = "WELCOME";

/// Decides whether the class record `class_record_id` completes its student's
/// current step, and if so advances the student or graduates them.
///
/// Returns `Ok(None)` whenever there is nothing to do: missing record or
/// student, excluded track, unparseable label, a record for a step the
/// student is no longer on, or an incomplete step. Only persistence failures
/// are errors.
pub fn evaluate_and_advance<S: ProgressStore + ?Sized>(
    store: &S,
    class_record_id: &str,
) -> Result<Option<ProgressionOutcome>, ProgressionError> {
    let Some(record) = store.class_record(class_record_id)? else {
        debug!(class_record_id, "class record not found");
        return Ok(None);
    };
    let (Some(level), Some(step)) = (record.level.as_deref(), record.step.as_deref()) else {
        debug!(class_record_id, "class record has no level/step");
        return Ok(None);
    };
    if level.eq_ignore_ascii_case(ORIENTATION_LEVEL) || step.eq_ignore_ascii_case(WELCOME_STEP) {
        debug!(class_record_id, level, step, "orientation track is not evaluated");
        return Ok(None);
    }
    if parse_step_number(step).is_none() {
        debug!(class_record_id, step, "unparseable step label");
        return Ok(None);
    }

    let Some(student) = store.student_progress(&record.student_id)? else {
        debug!(student_id = %record.student_id, "student not found");
        return Ok(None);
    };
    let Some(track) = student.track_at(level, step) else {
        debug!(
            student_id = %student.student_id,
            level,
            step,
            "record is not for the student's current step"
        );
        return Ok(None);
    };
    let from = Position::new(level, step);

    let catalog = store.catalog()?;
    if catalog.find_level_by_step_label(step).is_none() {
        debug!(step, "current step missing from catalog");
        return Ok(None);
    }

    let complete = is_step_complete(store, &student.student_id, level, step, student.override_key())?;
    debug!(
        student_id = %student.student_id,
        override_key = student.override_key(),
        level,
        step,
        complete,
        "step evaluated"
    );
    if !complete {
        return Ok(None);
    }

    let next = next_step_label(step).and_then(|label| {
        catalog
            .find_level_by_step_label(&label)
            .map(|entry| (Position::new(entry.level_code.as_str(), label), entry.is_parallel))
    });

    match next {
        Some((to, is_parallel)) => {
            let next_track = Track::for_level(is_parallel);
            store.advance(&Advancement {
                student_id: student.student_id.clone(),
                track: next_track,
                from: Some(from.clone()),
                to: to.clone(),
                class_record_id: Some(record.id.clone()),
            })?;
            info!(
                student_id = %student.student_id,
                from_level = %from.level,
                from_step = %from.step,
                to_level = %to.level,
                to_step = %to.step,
                track = next_track.as_str(),
                "student advanced"
            );
            Ok(Some(ProgressionOutcome::Advanced {
                from,
                to,
                track: next_track,
            }))
        }
        None => {
            store.graduate(&Graduation {
                student_id: student.student_id.clone(),
                contact: student.contact.clone(),
                track,
                from: from.clone(),
                class_record_id: Some(record.id.clone()),
            })?;
            info!(
                student_id = %student.student_id,
                level = %from.level,
                step = %from.step,
                "student graduated; credential revoked"
            );
            Ok(Some(ProgressionOutcome::Graduated { from, track }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::progression::store::SqliteProgressStore;
    use rusqlite::Connection;

    fn workspace() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute("INSERT INTO levels(code, is_parallel, sort_order) VALUES('B1',0,0)", [])
            .expect("level");
        for (i, label) in ["Step 4", "Step 5", "Step 6", "Step 7", "Step 8"].iter().enumerate() {
            conn.execute(
                "INSERT INTO level_steps(level_code, idx, label) VALUES('B1', ?, ?)",
                (i as i64, label),
            )
            .expect("step");
        }
        conn.execute(
            "INSERT INTO students(id, last_name, first_name, email, level, step)
             VALUES('S1','Doe','Jane','jane@school.test','B1','Step 5')",
            [],
        )
        .expect("student");
        conn.execute(
            "INSERT INTO credentials(email, password_hash, salt, created_at)
             VALUES('jane@school.test','h','s','2026-01-01T00:00:00Z')",
            [],
        )
        .expect("credential");
        conn
    }

    fn add_record(conn: &Connection, id: &str, step: &str, kind: &str, failed_jump: bool) {
        conn.execute(
            "INSERT INTO class_records(id, student_id, level, step, kind, attended, participated, failed_jump, created_at)
             VALUES(?, 'S1', 'B1', ?, ?, 1, 0, ?, '2026-02-01T10:00:00Z')",
            (id, step, kind, failed_jump as i64),
        )
        .expect("class record");
    }

    fn set_step(conn: &Connection, step: &str) {
        conn.execute("UPDATE students SET step = ? WHERE id = 'S1'", [step])
            .expect("set step");
    }

    fn student_step(conn: &Connection) -> String {
        conn.query_row("SELECT step FROM students WHERE id = 'S1'", [], |r| r.get(0))
            .expect("step")
    }

    #[test]
    fn jump_step_attempt_advances_to_next_step() {
        let conn = workspace();
        add_record(&conn, "r1", "Step 5", "SESSION", false);
        let store = SqliteProgressStore::new(&conn);

        let out = evaluate_and_advance(&store, "r1").expect("evaluate");
        assert_eq!(
            out,
            Some(ProgressionOutcome::Advanced {
                from: Position::new("B1", "Step 5"),
                to: Position::new("B1", "Step 6"),
                track: Track::Primary,
            })
        );
        assert_eq!(student_step(&conn), "Step 6");
    }

    #[test]
    fn vetoed_jump_step_is_a_no_op() {
        let conn = workspace();
        add_record(&conn, "r1", "Step 5", "SESSION", true);
        let store = SqliteProgressStore::new(&conn);
        assert_eq!(evaluate_and_advance(&store, "r1").expect("evaluate"), None);
        assert_eq!(student_step(&conn), "Step 5");
    }

    #[test]
    fn regular_step_waits_for_the_club() {
        let conn = workspace();
        set_step(&conn, "Step 7");
        add_record(&conn, "r1", "Step 7", "SESSION", false);
        add_record(&conn, "r2", "Step 7", "SESSION", false);
        let store = SqliteProgressStore::new(&conn);
        assert_eq!(evaluate_and_advance(&store, "r2").expect("evaluate"), None);

        add_record(&conn, "r3", "Step 7", "CLUB", false);
        // Club records for the current step carry the step label, so they
        // trigger evaluation like any other record.
        let out = evaluate_and_advance(&store, "r3").expect("evaluate");
        assert!(matches!(out, Some(ProgressionOutcome::Advanced { .. })));
        assert_eq!(student_step(&conn), "Step 8");
    }

    #[test]
    fn stale_step_record_does_not_advance() {
        let conn = workspace();
        set_step(&conn, "Step 6");
        add_record(&conn, "r1", "Step 4", "SESSION", false);
        add_record(&conn, "r2", "Step 4", "SESSION", false);
        add_record(&conn, "r3", "Step 4", "CLUB", false);
        let store = SqliteProgressStore::new(&conn);
        assert_eq!(evaluate_and_advance(&store, "r3").expect("evaluate"), None);
        assert_eq!(student_step(&conn), "Step 6");
    }

    #[test]
    fn override_false_blocks_and_true_forces() {
        let conn = workspace();
        add_record(&conn, "r1", "Step 5", "SESSION", false);
        conn.execute(
            "INSERT INTO progress_overrides(student_key, step, is_completed) VALUES('S1','Step 5',0)",
            [],
        )
        .expect("override");
        let store = SqliteProgressStore::new(&conn);
        assert_eq!(evaluate_and_advance(&store, "r1").expect("evaluate"), None);

        set_step(&conn, "Step 7");
        add_record(&conn, "r2", "Step 7", "OTHER", false);
        conn.execute(
            "INSERT INTO progress_overrides(student_key, step, is_completed) VALUES('S1','Step 7',1)",
            [],
        )
        .expect("override");
        let out = evaluate_and_advance(&store, "r2").expect("evaluate");
        assert!(matches!(out, Some(ProgressionOutcome::Advanced { .. })));
    }

    #[test]
    fn override_is_keyed_by_the_linked_account() {
        let conn = workspace();
        conn.execute(
            "INSERT INTO accounts(id, student_id, email, level, step)
             VALUES('ACC1','S1','jane@school.test','B1','Step 5')",
            [],
        )
        .expect("account");
        add_record(&conn, "r1", "Step 5", "SESSION", false);
        conn.execute(
            "INSERT INTO progress_overrides(student_key, step, is_completed) VALUES('ACC1','Step 5',0)",
            [],
        )
        .expect("override");
        let store = SqliteProgressStore::new(&conn);
        assert_eq!(evaluate_and_advance(&store, "r1").expect("evaluate"), None);
    }

    #[test]
    fn final_step_graduates_and_revokes_credential() {
        let conn = workspace();
        set_step(&conn, "Step 8");
        add_record(&conn, "r1", "Step 8", "SESSION", false);
        add_record(&conn, "r2", "Step 8", "SESSION", false);
        add_record(&conn, "r3", "Step 8", "CLUB", false);
        let store = SqliteProgressStore::new(&conn);

        let out = evaluate_and_advance(&store, "r3").expect("evaluate");
        assert_eq!(
            out,
            Some(ProgressionOutcome::Graduated {
                from: Position::new("B1", "Step 8"),
                track: Track::Primary,
            })
        );
        assert_eq!(student_step(&conn), "Step 8");
        let creds: i64 = conn
            .query_row("SELECT COUNT(*) FROM credentials", [], |r| r.get(0))
            .expect("count");
        assert_eq!(creds, 0);
    }

    #[test]
    fn orientation_track_and_missing_records_are_no_ops() {
        let conn = workspace();
        conn.execute(
            "UPDATE students SET level = 'ESS', step = 'WELCOME' WHERE id = 'S1'",
            [],
        )
        .expect("orientation");
        conn.execute(
            "INSERT INTO class_records(id, student_id, level, step, kind, attended, participated, failed_jump, created_at)
             VALUES('w1','S1','ESS','WELCOME','SESSION',1,0,0,'2026-02-01T10:00:00Z')",
            [],
        )
        .expect("record");
        let store = SqliteProgressStore::new(&conn);
        assert_eq!(evaluate_and_advance(&store, "w1").expect("evaluate"), None);
        assert_eq!(evaluate_and_advance(&store, "nope").expect("evaluate"), None);
    }

    #[test]
    fn parallel_level_advances_parallel_fields() {
        let conn = workspace();
        conn.execute("INSERT INTO levels(code, is_parallel, sort_order) VALUES('CONV',1,1)", [])
            .expect("level");
        for (i, label) in ["Step 21", "Step 22"].iter().enumerate() {
            conn.execute(
                "INSERT INTO level_steps(level_code, idx, label) VALUES('CONV', ?, ?)",
                (i as i64, label),
            )
            .expect("step");
        }
        conn.execute(
            "UPDATE students SET parallel_level = 'CONV', parallel_step = 'Step 21' WHERE id = 'S1'",
            [],
        )
        .expect("parallel track");
        conn.execute(
            "INSERT INTO progress_overrides(student_key, step, is_completed) VALUES('S1','Step 21',1)",
            [],
        )
        .expect("override");
        conn.execute(
            "INSERT INTO class_records(id, student_id, level, step, kind, attended, participated, failed_jump, created_at)
             VALUES('p1','S1','CONV','Step 21','SESSION',1,0,0,'2026-02-01T10:00:00Z')",
            [],
        )
        .expect("record");
        let store = SqliteProgressStore::new(&conn);

        let out = evaluate_and_advance(&store, "p1").expect("evaluate");
        assert!(matches!(
            out,
            Some(ProgressionOutcome::Advanced { track: Track::Parallel, .. })
        ));
        let (primary, parallel): (String, String) = conn
            .query_row(
                "SELECT step, parallel_step FROM students WHERE id = 'S1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("row");
        assert_eq!(primary, "Step 5");
        assert_eq!(parallel, "Step 22");
    }

    #[test]
    fn orientation_level_is_skipped_even_with_numbered_steps() {
        let conn = workspace();
        conn.execute("INSERT INTO levels(code, is_parallel, sort_order) VALUES('ESS',0,-1)", [])
            .expect("level");
        for (i, label) in ["Step 1", "Step 2"].iter().enumerate() {
            conn.execute(
                "INSERT INTO level_steps(level_code, idx, label) VALUES('ESS', ?, ?)",
                (i as i64, label),
            )
            .expect("step");
        }
        conn.execute(
            "UPDATE students SET level = 'ESS', step = 'Step 1' WHERE id = 'S1'",
            [],
        )
        .expect("orientation");
        conn.execute(
            "INSERT INTO progress_overrides(student_key, step, is_completed) VALUES('S1','Step 1',1)",
            [],
        )
        .expect("override");
        conn.execute(
            "INSERT INTO class_records(id, student_id, level, step, kind, attended, participated, failed_jump, created_at)
             VALUES('e1','S1','ESS','Step 1','SESSION',1,0,0,'2026-02-01T10:00:00Z')",
            [],
        )
        .expect("record");
        let store = SqliteProgressStore::new(&conn);

        assert_eq!(evaluate_and_advance(&store, "e1").expect("evaluate"), None);
        assert_eq!(student_step(&conn), "Step 1");
    }

    #[test]
    fn records_without_a_step_number_do_not_count_as_clubs() {
        let conn = workspace();
        conn.execute(
            "INSERT INTO level_clubs(level_code, label) VALUES('B1','Conversation Club')",
            [],
        )
        .expect("club");
        set_step(&conn, "Step 7");
        conn.execute(
            "INSERT INTO class_records(id, student_id, level, step, kind, attended, participated, failed_jump, created_at)
             VALUES('c1','S1','B1','Conversation Club',NULL,1,0,0,'2026-02-01T09:00:00Z')",
            [],
        )
        .expect("club record");
        add_record(&conn, "r1", "Step 7", "SESSION", false);
        add_record(&conn, "r2", "Step 7", "SESSION", false);
        let store = SqliteProgressStore::new(&conn);

        assert_eq!(evaluate_and_advance(&store, "r2").expect("evaluate"), None);
        assert_eq!(student_step(&conn), "Step 7");

        add_record(&conn, "r3", "Step 7", "CLUB", false);
        assert!(evaluate_and_advance(&store, "r3").expect("evaluate").is_some());
        assert_eq!(student_step(&conn), "Step 8");
    }

    #[test]
    fn failed_account_write_rolls_back_and_propagates() {
        let conn = workspace();
        conn.execute(
            "INSERT INTO accounts(id, student_id, email, level, step)
             VALUES('ACC1','S1','jane@school.test','B1','Step 5')",
            [],
        )
        .expect("account");
        conn.execute(
            "CREATE TRIGGER accounts_locked BEFORE UPDATE ON accounts
             BEGIN SELECT RAISE(ABORT, 'accounts locked'); END",
            [],
        )
        .expect("trigger");
        add_record(&conn, "r1", "Step 5", "SESSION", false);
        let store = SqliteProgressStore::new(&conn);

        let result = evaluate_and_advance(&store, "r1");
        assert!(matches!(result, Err(ProgressionError::Db(_))), "{:?}", result);
        assert_eq!(student_step(&conn), "Step 5");
        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM progress_events", [], |r| r.get(0))
            .expect("count");
        assert_eq!(events, 0);
    }
}
