use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{db_conn, now_rfc3339, required_str};
use crate::ipc::types::{AppState, Request};
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 8;

/// Argon2id PHC string; the salt is embedded in the result.
fn hash_password(salt: &SaltString, password: &str) -> Result<String, HandlerErr> {
    Argon2::default()
        .hash_password(password.as_bytes(), salt)
        .map(|h| h.to_string())
        .map_err(|e| HandlerErr::new("hash_failed", e.to_string()))
}

fn new_salt() -> Result<SaltString, HandlerErr> {
    SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| HandlerErr::new("hash_failed", e.to_string()))
}

fn normalize_email(email: &str) -> Result<String, HandlerErr> {
    let e = email.trim().to_ascii_lowercase();
    if !e.contains('@') {
        return Err(HandlerErr::bad_params("email must contain @"));
    }
    Ok(e)
}

fn credentials_set(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let email = normalize_email(&required_str(req, "email")?)?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HandlerErr::bad_params(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let salt = new_salt()?;
    let hash = hash_password(&salt, password)?;
    conn.execute(
        "INSERT INTO credentials(email, password_hash, salt, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(email) DO UPDATE SET
           password_hash = excluded.password_hash,
           salt = excluded.salt",
        (&email, &hash, salt.as_str(), now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "credentials" }))
    })?;
    Ok(json!({ "email": email }))
}

fn credentials_exists(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let email = normalize_email(&required_str(req, "email")?)?;
    let exists = conn
        .query_row("SELECT 1 FROM credentials WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    Ok(json!({ "email": email, "exists": exists }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "credentials.set" => credentials_set(state, req),
        "credentials.exists" => credentials_exists(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
