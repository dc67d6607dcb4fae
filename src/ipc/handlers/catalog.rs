use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{db_conn, optional_bool, required_str, string_list};
use crate::ipc::types::{AppState, Request};
use crate::progression::{ProgressStore, SqliteProgressStore};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashSet;
use tracing::info;

fn levels_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let code = required_str(req, "code")?;
    let steps = string_list(req, "steps")?;
    let clubs = string_list(req, "clubs")?;
    let is_parallel = optional_bool(req, "isParallel")?.unwrap_or(false);
    let sort_order = match req.params.get("sortOrder") {
        None | Some(serde_json::Value::Null) => 0,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("sortOrder must be an integer"))?,
    };

    if steps.is_empty() {
        return Err(HandlerErr::bad_params("steps must not be empty"));
    }
    let mut seen = HashSet::new();
    for label in &steps {
        if !seen.insert(label.as_str()) {
            return Err(HandlerErr::bad_params("duplicate step label")
                .with_details(json!({ "step": label })));
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    {
        let mut owner_stmt = tx
            .prepare("SELECT level_code FROM level_steps WHERE label = ? AND level_code <> ?")
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        for label in &steps {
            let owner: Option<String> = owner_stmt
                .query_row((label, &code), |r| r.get(0))
                .optional()
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            if let Some(owner) = owner {
                return Err(HandlerErr::bad_params("step label already belongs to another level")
                    .with_details(json!({ "step": label, "level": owner })));
            }
        }
    }

    tx.execute(
        "INSERT INTO levels(code, is_parallel, sort_order) VALUES(?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET is_parallel = excluded.is_parallel, sort_order = excluded.sort_order",
        (&code, is_parallel as i64, sort_order),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "levels" })))?;
    tx.execute("DELETE FROM level_steps WHERE level_code = ?", [&code])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM level_clubs WHERE level_code = ?", [&code])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    for (i, label) in steps.iter().enumerate() {
        tx.execute(
            "INSERT INTO level_steps(level_code, idx, label) VALUES(?, ?, ?)",
            (&code, i as i64, label),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "level_steps" }))
        })?;
    }
    for label in &clubs {
        tx.execute(
            "INSERT OR IGNORE INTO level_clubs(level_code, label) VALUES(?, ?)",
            (&code, label),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "level_clubs" }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    info!(level = %code, steps = steps.len(), clubs = clubs.len(), is_parallel, "level saved");
    Ok(json!({ "code": code, "stepCount": steps.len(), "clubCount": clubs.len() }))
}

fn levels_list(state: &AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let catalog = SqliteProgressStore::new(conn).catalog()?;
    let levels: Vec<serde_json::Value> = catalog
        .entries()
        .iter()
        .map(|e| {
            json!({
                "code": e.level_code,
                "steps": e.steps,
                "clubs": e.clubs,
                "isParallel": e.is_parallel,
            })
        })
        .collect();
    Ok(json!({ "levels": levels }))
}

fn levels_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let code = required_str(req, "code")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute("DELETE FROM level_steps WHERE level_code = ?", [&code])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM level_clubs WHERE level_code = ?", [&code])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    let removed = tx
        .execute("DELETE FROM levels WHERE code = ?", [&code])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("level not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "code": code, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "levels.upsert" => levels_upsert(state, req),
        "levels.list" => levels_list(state, req),
        "levels.delete" => levels_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
