use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "academy.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT,
            level TEXT,
            step TEXT,
            parallel_level TEXT,
            parallel_step TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    // Workspaces created before parallel tracks existed lack the mirror columns.
    ensure_parallel_columns(conn, "students")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_email ON students(email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            email TEXT,
            level TEXT,
            step TEXT,
            parallel_level TEXT,
            parallel_step TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_parallel_columns(conn, "accounts")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            code TEXT PRIMARY KEY,
            is_parallel INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS level_steps(
            level_code TEXT NOT NULL,
            idx INTEGER NOT NULL,
            label TEXT NOT NULL UNIQUE,
            PRIMARY KEY(level_code, idx),
            FOREIGN KEY(level_code) REFERENCES levels(code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS level_clubs(
            level_code TEXT NOT NULL,
            label TEXT NOT NULL,
            PRIMARY KEY(level_code, label),
            FOREIGN KEY(level_code) REFERENCES levels(code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            level TEXT,
            step TEXT,
            kind TEXT,
            attended INTEGER,
            present INTEGER,
            participated INTEGER NOT NULL DEFAULT 0,
            failed_jump INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_records_student_level ON class_records(student_id, level)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS progress_overrides(
            student_key TEXT NOT NULL,
            step TEXT NOT NULL,
            is_completed INTEGER NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(student_key, step)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS credentials(
            email TEXT PRIMARY KEY,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS progress_events(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            class_record_id TEXT,
            from_level TEXT,
            from_step TEXT,
            to_level TEXT,
            to_step TEXT,
            track TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_progress_events_student ON progress_events(student_id)",
        [],
    )?;

    Ok(())
}

fn ensure_parallel_columns(conn: &Connection, table: &str) -> anyhow::Result<()> {
    for column in ["parallel_level", "parallel_step"] {
        if !table_has_column(conn, table, column)? {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} TEXT", table, column),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
