use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{db_conn, now_rfc3339, required_bool, required_str};
use crate::ipc::types::{AppState, Request};
use crate::progression::{ProgressStore, SqliteProgressStore};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

/// Overrides live under the same key the engine consults.
fn override_key(conn: &Connection, student_id: &str) -> Result<String, HandlerErr> {
    let student = SqliteProgressStore::new(conn)
        .student_progress(student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(student.override_key().to_string())
}

fn overrides_set(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let step = required_str(req, "step")?;
    let is_completed = required_bool(req, "isCompleted")?;
    let key = override_key(conn, &student_id)?;

    conn.execute(
        "INSERT INTO progress_overrides(student_key, step, is_completed, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_key, step) DO UPDATE SET
           is_completed = excluded.is_completed,
           updated_at = excluded.updated_at",
        (&key, &step, is_completed as i64, now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "progress_overrides" }))
    })?;

    info!(student_id = %student_id, step = %step, is_completed, "progress override set");
    Ok(json!({ "studentKey": key, "step": step, "isCompleted": is_completed }))
}

fn overrides_clear(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let step = required_str(req, "step")?;
    let key = override_key(conn, &student_id)?;
    let removed = conn
        .execute(
            "DELETE FROM progress_overrides WHERE student_key = ? AND step = ?",
            (&key, &step),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "studentKey": key, "step": step, "cleared": removed > 0 }))
}

fn overrides_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let key = override_key(conn, &student_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT step, is_completed, updated_at
             FROM progress_overrides
             WHERE student_key = ?
             ORDER BY step",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let overrides = stmt
        .query_map([&key], |r| {
            Ok(json!({
                "step": r.get::<_, String>(0)?,
                "isCompleted": r.get::<_, i64>(1)? != 0,
                "updatedAt": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "studentKey": key, "overrides": overrides }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "overrides.set" => overrides_set(state, req),
        "overrides.clear" => overrides_clear(state, req),
        "overrides.list" => overrides_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
