use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{db_conn, now_rfc3339, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::progression::{evaluate_and_advance, ClassKind, SqliteProgressStore};
use rusqlite::{types::Value, params_from_iter, OptionalExtension};
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

/// Saves one class evaluation, then runs progression for it.
///
/// The record stays saved even when progression fails; the error carries the
/// new record id so the caller can retry with `progression.evaluate`.
fn class_records_save(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let level = optional_str(req, "level")?;
    let step = optional_str(req, "step")?;
    let kind = match optional_str(req, "kind")? {
        None => None,
        Some(tag) => Some(ClassKind::from_tag(&tag).ok_or_else(|| {
            HandlerErr::bad_params("kind must be one of: SESSION, CLUB, OTHER")
                .with_details(json!({ "kind": tag }))
        })?),
    };
    let attended = optional_bool(req, "attended")?;
    let present = optional_bool(req, "present")?;
    let participated = optional_bool(req, "participated")?.unwrap_or(false);
    let failed_jump = optional_bool(req, "failedJump")?.unwrap_or(false);

    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let record_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_records(id, student_id, level, step, kind, attended, present, participated, failed_jump, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record_id,
            &student_id,
            &level,
            &step,
            kind.map(|k| k.as_str()),
            attended.map(|v| v as i64),
            present.map(|v| v as i64),
            participated as i64,
            failed_jump as i64,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "class_records" }))
    })?;
    debug!(class_record_id = %record_id, student_id = %student_id, "class record saved");

    let store = SqliteProgressStore::new(conn);
    match evaluate_and_advance(&store, &record_id) {
        Ok(outcome) => Ok(json!({
            "classRecordId": record_id,
            "progression": outcome.map(|o| o.to_json()),
        })),
        Err(e) => {
            error!(class_record_id = %record_id, error = %e, "progression failed after save");
            Err(HandlerErr::new("progression_failed", e.to_string())
                .with_details(json!({ "classRecordId": record_id, "cause": e.code() })))
        }
    }
}

fn class_records_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let level = optional_str(req, "level")?;

    let mut sql = String::from(
        "SELECT id, level, step, kind, attended, present, participated, failed_jump, created_at
         FROM class_records
         WHERE student_id = ?",
    );
    let mut bind: Vec<Value> = vec![Value::Text(student_id)];
    if let Some(level) = level {
        sql.push_str(" AND level = ?");
        bind.push(Value::Text(level));
    }
    sql.push_str(" ORDER BY created_at, rowid");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let records = stmt
        .query_map(params_from_iter(bind), |r| {
            let attended: Option<i64> = r.get(4)?;
            let present: Option<i64> = r.get(5)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "level": r.get::<_, Option<String>>(1)?,
                "step": r.get::<_, Option<String>>(2)?,
                "kind": r.get::<_, Option<String>>(3)?,
                "attended": attended.or(present).map(|v| v != 0).unwrap_or(false),
                "participated": r.get::<_, i64>(6)? != 0,
                "failedJump": r.get::<_, i64>(7)? != 0,
                "createdAt": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "classRecords": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classRecords.save" => class_records_save(state, req),
        "classRecords.list" => class_records_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
