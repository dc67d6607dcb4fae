use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_academyd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn academyd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn jump_step_attempt_advances_both_progress_records() {
    let workspace = temp_dir("academy-e2e-jump");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "levels.upsert",
        json!({ "code": "B1", "steps": ["Step 5", "Step 6"], "clubs": [], "isParallel": false }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "firstName": "Sam",
            "lastName": "One",
            "email": "s1@academy.test",
            "level": "B1",
            "step": "Step 5"
        }),
    );
    let student_id = created["studentId"].as_str().expect("studentId").to_string();
    assert!(created["accountId"].is_string());

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classRecords.save",
        json!({
            "studentId": student_id,
            "level": "B1",
            "step": "Step 5",
            "kind": "SESSION",
            "attended": true,
            "failedJump": false
        }),
    );
    let progression = &saved["progression"];
    assert_eq!(progression["advanced"], json!(true));
    assert_eq!(progression["from"], json!({ "level": "B1", "step": "Step 5" }));
    assert_eq!(progression["to"], json!({ "level": "B1", "step": "Step 6" }));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.get",
        json!({ "studentId": student_id }),
    );
    let student = &fetched["student"];
    assert_eq!(student["step"], json!("Step 6"));
    assert_eq!(student["account"]["step"], json!("Step 6"));
    assert_eq!(student["account"]["level"], json!("B1"));

    // A late record for the step just left must not move the student again.
    let late = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classRecords.save",
        json!({
            "studentId": student_id,
            "level": "B1",
            "step": "Step 5",
            "kind": "SESSION",
            "attended": true
        }),
    );
    assert!(late["progression"].is_null());

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "progression.history",
        json!({ "studentId": student_id }),
    );
    let events = history["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["kind"], json!("advanced"));
    assert_eq!(events[0]["toStep"], json!("Step 6"));

    let _ = child.kill();
}

#[test]
fn regular_step_needs_two_sessions_and_a_club() {
    let workspace = temp_dir("academy-e2e-regular");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "levels.upsert",
        json!({ "code": "B1", "steps": ["Step 6", "Step 7", "Step 8"] }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "firstName": "Ana", "lastName": "Two", "level": "B1", "step": "Step 7" }),
    );
    let student_id = created["studentId"].as_str().expect("studentId").to_string();
    assert!(created["accountId"].is_null());

    let save = |stdin: &mut ChildStdin,
                reader: &mut BufReader<ChildStdout>,
                id: &str,
                kind: &str,
                attended: bool| {
        request_ok(
            stdin,
            reader,
            id,
            "classRecords.save",
            json!({
                "studentId": student_id,
                "level": "B1",
                "step": "Step 7",
                "kind": kind,
                "attended": attended
            }),
        )
    };

    assert!(save(&mut stdin, &mut reader, "4", "SESSION", true)["progression"].is_null());
    assert!(save(&mut stdin, &mut reader, "5", "CLUB", true)["progression"].is_null());
    // An absent session does not count.
    assert!(save(&mut stdin, &mut reader, "6", "SESSION", false)["progression"].is_null());

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "progression.stepStatus",
        json!({ "studentId": student_id }),
    );
    assert_eq!(status["evaluation"]["successfulSessions"], json!(1));
    assert_eq!(status["evaluation"]["successfulClubs"], json!(1));
    assert_eq!(status["evaluation"]["complete"], json!(false));
    assert_eq!(status["next"]["step"], json!("Step 8"));

    let done = save(&mut stdin, &mut reader, "8", "SESSION", true);
    assert_eq!(done["progression"]["advanced"], json!(true));
    assert_eq!(done["progression"]["to"]["step"], json!("Step 8"));

    let _ = child.kill();
}

#[test]
fn failed_progress_write_keeps_record_and_reports_its_id() {
    let workspace = temp_dir("academy-e2e-rollback");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "levels.upsert",
        json!({ "code": "B1", "steps": ["Step 5", "Step 6"] }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "firstName": "Roll",
            "lastName": "Back",
            "email": "rb@academy.test",
            "level": "B1",
            "step": "Step 5"
        }),
    );
    let student_id = created["studentId"].as_str().expect("studentId").to_string();

    {
        let conn = rusqlite::Connection::open(workspace.join("academy.sqlite3")).expect("open db");
        conn.execute(
            "CREATE TRIGGER accounts_locked BEFORE UPDATE ON accounts
             BEGIN SELECT RAISE(ABORT, 'accounts locked'); END",
            [],
        )
        .expect("trigger");
    }

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "classRecords.save",
        json!({
            "studentId": student_id,
            "level": "B1",
            "step": "Step 5",
            "kind": "SESSION",
            "attended": true
        }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("progression_failed"));
    let record_id = resp["error"]["details"]["classRecordId"]
        .as_str()
        .expect("classRecordId")
        .to_string();

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(fetched["student"]["step"], json!("Step 5"));
    assert_eq!(fetched["student"]["account"]["step"], json!("Step 5"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classRecords.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(listed["classRecords"][0]["id"], json!(record_id));

    {
        let conn = rusqlite::Connection::open(workspace.join("academy.sqlite3")).expect("open db");
        conn.execute("DROP TRIGGER accounts_locked", []).expect("drop trigger");
    }
    let retried = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "progression.evaluate",
        json!({ "classRecordId": record_id }),
    );
    assert_eq!(retried["progression"]["to"]["step"], json!("Step 6"));

    let _ = child.kill();
}
