use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{db_conn, now_rfc3339, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::progression::{
    insert_event, write_track, Position, ProgressStore, SqliteProgressStore, Track,
    ORIENTATION_LEVEL,
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const STUDENT_SELECT: &str = "SELECT
       s.id, s.last_name, s.first_name, s.email,
       s.level, s.step, s.parallel_level, s.parallel_step, s.updated_at,
       a.id, a.email, a.level, a.step, a.parallel_level, a.parallel_step
     FROM students s
     LEFT JOIN accounts a ON a.student_id = s.id";

fn student_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let account_id: Option<String> = r.get(9)?;
    let account = match account_id {
        Some(id) => json!({
            "accountId": id,
            "email": r.get::<_, Option<String>>(10)?,
            "level": r.get::<_, Option<String>>(11)?,
            "step": r.get::<_, Option<String>>(12)?,
            "parallelLevel": r.get::<_, Option<String>>(13)?,
            "parallelStep": r.get::<_, Option<String>>(14)?,
        }),
        None => serde_json::Value::Null,
    };
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "lastName": r.get::<_, String>(1)?,
        "firstName": r.get::<_, String>(2)?,
        "email": r.get::<_, Option<String>>(3)?,
        "level": r.get::<_, Option<String>>(4)?,
        "step": r.get::<_, Option<String>>(5)?,
        "parallelLevel": r.get::<_, Option<String>>(6)?,
        "parallelStep": r.get::<_, Option<String>>(7)?,
        "updatedAt": r.get::<_, Option<String>>(8)?,
        "account": account,
    }))
}

fn load_student(conn: &Connection, student_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE s.id = ?", STUDENT_SELECT),
        [student_id],
        student_json,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn students_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let first_name = required_str(req, "firstName")?;
    let last_name = required_str(req, "lastName")?;
    let email = optional_str(req, "email")?.map(|e| e.to_ascii_lowercase());
    let level = optional_str(req, "level")?;
    let step = optional_str(req, "step")?;
    if level.is_some() != step.is_some() {
        return Err(HandlerErr::bad_params("level and step must be given together"));
    }
    let with_account = optional_bool(req, "withAccount")?.unwrap_or(email.is_some());

    let student_id = Uuid::new_v4().to_string();
    let account_id = with_account.then(|| Uuid::new_v4().to_string());
    let now = now_rfc3339();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO students(id, last_name, first_name, email, level, step, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&student_id, &last_name, &first_name, &email, &level, &step, &now),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" }))
    })?;
    if let Some(account_id) = account_id.as_ref() {
        tx.execute(
            "INSERT INTO accounts(id, student_id, email, level, step, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (account_id, &student_id, &email, &level, &step, &now),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "accounts" }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    info!(student_id = %student_id, "student created");
    Ok(json!({ "studentId": student_id, "accountId": account_id }))
}

fn students_list(state: &AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY s.last_name, s.first_name", STUDENT_SELECT))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn students_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    Ok(json!({ "student": load_student(conn, &student_id)? }))
}

/// Administrative placement on a track, written to both progress
/// representations in one transaction.
fn students_set_progress(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let level = required_str(req, "level")?;
    let step = required_str(req, "step")?;
    let parallel = optional_bool(req, "parallel")?;

    let mut level_is_parallel = false;
    if !level.eq_ignore_ascii_case(ORIENTATION_LEVEL) {
        let catalog = SqliteProgressStore::new(conn).catalog()?;
        match catalog.find_level_by_step_label(&step) {
            Some(entry) if entry.level_code == level => level_is_parallel = entry.is_parallel,
            Some(entry) => {
                return Err(HandlerErr::bad_params("step belongs to another level")
                    .with_details(json!({ "step": step, "level": entry.level_code })))
            }
            None => {
                return Err(HandlerErr::bad_params("unknown step").with_details(json!({ "step": step })))
            }
        }
    }

    let track = Track::for_level(parallel.unwrap_or(level_is_parallel));

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let (level_col, step_col) = track.columns();
    let previous: Option<(Option<String>, Option<String>)> = tx
        .query_row(
            &format!("SELECT {}, {} FROM students WHERE id = ?", level_col, step_col),
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((prev_level, prev_step)) = previous else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let from = match (prev_level, prev_step) {
        (Some(l), Some(s)) => Some(Position::new(l, s)),
        _ => None,
    };
    let to = Position::new(level, step);
    let now = now_rfc3339();
    write_track(&tx, &student_id, track, &to, &now)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    insert_event(&tx, &student_id, "placed", track, from.as_ref(), Some(&to), None, &now)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    info!(student_id = %student_id, level = %to.level, step = %to.step, track = track.as_str(), "student placed");
    Ok(json!({
        "studentId": student_id,
        "track": track,
        "from": from,
        "to": to,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.create" => students_create(state, req),
        "students.list" => students_list(state, req),
        "students.get" => students_get(state, req),
        "students.setProgress" => students_set_progress(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
