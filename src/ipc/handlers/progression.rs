use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{db_conn, optional_bool, required_str};
use crate::ipc::types::{AppState, Request};
use crate::progression::{
    evaluate_and_advance, evaluate_step_for, next_step_label, ProgressStore,
    SqliteProgressStore, Track,
};
use serde_json::json;
use tracing::error;

fn progression_evaluate(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_record_id = required_str(req, "classRecordId")?;
    let store = SqliteProgressStore::new(conn);
    let outcome = evaluate_and_advance(&store, &class_record_id).map_err(|e| {
        error!(class_record_id = %class_record_id, error = %e, "progression failed");
        HandlerErr::new("progression_failed", e.to_string())
            .with_details(json!({ "classRecordId": class_record_id, "cause": e.code() }))
    })?;
    Ok(json!({
        "classRecordId": class_record_id,
        "progression": outcome.map(|o| o.to_json()),
    }))
}

/// Read-only breakdown of the student's current step on one track.
fn progression_step_status(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let track = Track::for_level(optional_bool(req, "parallel")?.unwrap_or(false));

    let store = SqliteProgressStore::new(conn);
    let student = store
        .student_progress(&student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let Some(position) = student.position(track) else {
        return Err(HandlerErr::not_found("student has no current step on this track")
            .with_details(json!({ "track": track })));
    };

    let catalog = store.catalog()?;
    let current = catalog.find_level_by_step_label(&position.step);
    let evaluation = evaluate_step_for(
        &store,
        &student.student_id,
        &position.level,
        &position.step,
        student.override_key(),
    )?;
    let next = next_step_label(&position.step).and_then(|label| {
        catalog
            .find_level_by_step_label(&label)
            .map(|e| json!({ "level": e.level_code, "step": label }))
    });

    Ok(json!({
        "studentId": student.student_id,
        "track": track,
        "current": position,
        "inCatalog": current.is_some(),
        "next": next,
        "finalStep": current.is_some() && next.is_none(),
        "evaluation": evaluation,
    }))
}

fn progression_history(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, kind, track, class_record_id, from_level, from_step, to_level, to_step, created_at
             FROM progress_events
             WHERE student_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let events = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "kind": r.get::<_, String>(1)?,
                "track": r.get::<_, String>(2)?,
                "classRecordId": r.get::<_, Option<String>>(3)?,
                "fromLevel": r.get::<_, Option<String>>(4)?,
                "fromStep": r.get::<_, Option<String>>(5)?,
                "toLevel": r.get::<_, Option<String>>(6)?,
                "toStep": r.get::<_, Option<String>>(7)?,
                "createdAt": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "studentId": student_id, "events": events }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "progression.evaluate" => progression_evaluate(state, req),
        "progression.stepStatus" => progression_step_status(state, req),
        "progression.history" => progression_history(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
