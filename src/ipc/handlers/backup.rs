use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn collect_rows(
    conn: &Connection,
    sql: &str,
    map: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value>,
) -> Result<Vec<serde_json::Value>, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    stmt.query_map([], |r| map(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())
}

/// Serializes the whole workspace (everything except the snapshot list) into
/// the backup document's structured section. Rows are collected in key order
/// so the same state always produces the same checksum.
pub fn collect_structured(conn: &Connection) -> Result<serde_json::Value, String> {
    let groups = collect_rows(
        conn,
        "SELECT id, subject, grade_level, group_letter, color, sort_order
         FROM groups ORDER BY id",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subject": r.get::<_, String>(1)?,
                "gradeLevel": r.get::<_, String>(2)?,
                "groupLetter": r.get::<_, String>(3)?,
                "color": r.get::<_, Option<String>>(4)?,
                "sortOrder": r.get::<_, i64>(5)?
            }))
        },
    )?;

    let students = collect_rows(
        conn,
        "SELECT id, group_id, name, observations, characteristics, classifications,
                sort_order, updated_at
         FROM students ORDER BY id",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "groupId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "observations": r.get::<_, String>(3)?,
                "characteristics": r.get::<_, String>(4)?,
                "classifications": r.get::<_, String>(5)?,
                "sortOrder": r.get::<_, i64>(6)?,
                "updatedAt": r.get::<_, Option<String>>(7)?
            }))
        },
    )?;

    let activities = collect_rows(
        conn,
        "SELECT id, group_id, name, date, category, grading_type, mark, sort_order
         FROM activities ORDER BY id",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "groupId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "date": r.get::<_, String>(3)?,
                "category": r.get::<_, String>(4)?,
                "gradingType": r.get::<_, String>(5)?,
                "mark": r.get::<_, Option<String>>(6)?,
                "sortOrder": r.get::<_, i64>(7)?
            }))
        },
    )?;

    let grades = collect_rows(
        conn,
        "SELECT id, activity_id, student_id, value, observation, is_np, details
         FROM grades ORDER BY id",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "activityId": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "value": r.get::<_, String>(3)?,
                "observation": r.get::<_, String>(4)?,
                "isNP": r.get::<_, i64>(5)? != 0,
                "details": r.get::<_, String>(6)?
            }))
        },
    )?;

    let attendance = collect_rows(
        conn,
        "SELECT group_id, date, student_id, status, justified
         FROM attendance ORDER BY group_id, date, student_id",
        |r| {
            Ok(json!({
                "groupId": r.get::<_, String>(0)?,
                "date": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "justified": r.get::<_, i64>(4)? != 0
            }))
        },
    )?;

    let tasks = collect_rows(
        conn,
        "SELECT id, title, date, done, sort_order FROM agenda_tasks ORDER BY id",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "date": r.get::<_, Option<String>>(2)?,
                "done": r.get::<_, i64>(3)? != 0,
                "sortOrder": r.get::<_, i64>(4)?
            }))
        },
    )?;
    let meetings = collect_rows(
        conn,
        "SELECT id, title, date, time, notes FROM agenda_meetings ORDER BY id",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "time": r.get::<_, Option<String>>(3)?,
                "notes": r.get::<_, String>(4)?
            }))
        },
    )?;
    let notes = collect_rows(
        conn,
        "SELECT id, text, date FROM agenda_notes ORDER BY id",
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "text": r.get::<_, String>(1)?,
                "date": r.get::<_, Option<String>>(2)?
            }))
        },
    )?;
    let highlights = collect_rows(
        conn,
        "SELECT date, color, label FROM agenda_highlights ORDER BY date",
        |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "color": r.get::<_, Option<String>>(1)?,
                "label": r.get::<_, Option<String>>(2)?
            }))
        },
    )?;

    let custom_grading_types = collect_rows(
        conn,
        "SELECT id, name, kind, values_json, min, max, allow_decimals
         FROM custom_grading_types ORDER BY id",
        |r| {
            let values_json: Option<String> = r.get(3)?;
            let values: Option<Vec<String>> =
                values_json.and_then(|t| serde_json::from_str(&t).ok());
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "values": values,
                "min": r.get::<_, Option<f64>>(4)?,
                "max": r.get::<_, Option<f64>>(5)?,
                "allowDecimals": r.get::<_, Option<i64>>(6)?.map(|v| v != 0)
            }))
        },
    )?;

    let settings = collect_rows(
        conn,
        "SELECT key, value FROM settings ORDER BY key",
        |r| {
            let key: String = r.get(0)?;
            let raw: String = r.get(1)?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
            Ok(json!({ "key": key, "value": value }))
        },
    )?;

    Ok(json!({
        "groups": groups,
        "students": students,
        "activities": activities,
        "grades": grades,
        "attendance": attendance,
        "agenda": {
            "tasks": tasks,
            "meetings": meetings,
            "notes": notes,
            "highlights": highlights
        },
        "customGradingTypes": custom_grading_types,
        "settings": settings
    }))
}

fn str_of(v: &serde_json::Value, key: &str) -> String {
    v.get(key).and_then(|x| x.as_str()).unwrap_or_default().to_string()
}

fn opt_str_of(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key).and_then(|x| x.as_str()).map(|s| s.to_string())
}

fn i64_of(v: &serde_json::Value, key: &str) -> i64 {
    v.get(key).and_then(|x| x.as_i64()).unwrap_or(0)
}

fn bool_of(v: &serde_json::Value, key: &str) -> bool {
    v.get(key).and_then(|x| x.as_bool()).unwrap_or(false)
}

fn arr_of<'a>(v: &'a serde_json::Value, key: &str) -> Vec<&'a serde_json::Value> {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

/// Replaces every workspace table from a structured payload. Snapshots are
/// deliberately left alone so restoring one snapshot does not destroy the
/// others. Runs inside the caller's transaction.
pub fn restore_structured(
    tx: &Connection,
    structured: &serde_json::Value,
) -> Result<(), String> {
    for sql in [
        "DELETE FROM grades",
        "DELETE FROM attendance",
        "DELETE FROM activities",
        "DELETE FROM students",
        "DELETE FROM groups",
        "DELETE FROM agenda_tasks",
        "DELETE FROM agenda_meetings",
        "DELETE FROM agenda_notes",
        "DELETE FROM agenda_highlights",
        "DELETE FROM custom_grading_types",
        "DELETE FROM settings",
    ] {
        tx.execute(sql, []).map_err(|e| e.to_string())?;
    }

    for row in arr_of(structured, "customGradingTypes") {
        let values_json = row
            .get("values")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::to_string(v).unwrap_or_default());
        tx.execute(
            "INSERT INTO custom_grading_types(id, name, kind, values_json, min, max, allow_decimals)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "name"),
                str_of(row, "kind"),
                values_json,
                row.get("min").and_then(|v| v.as_f64()),
                row.get("max").and_then(|v| v.as_f64()),
                row.get("allowDecimals").and_then(|v| v.as_bool()).map(|b| b as i64),
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    for row in arr_of(structured, "groups") {
        tx.execute(
            "INSERT INTO groups(id, subject, grade_level, group_letter, color, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "subject"),
                str_of(row, "gradeLevel"),
                str_of(row, "groupLetter"),
                opt_str_of(row, "color"),
                i64_of(row, "sortOrder"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    for row in arr_of(structured, "students") {
        tx.execute(
            "INSERT INTO students(
                id, group_id, name, observations, characteristics, classifications,
                sort_order, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "groupId"),
                str_of(row, "name"),
                str_of(row, "observations"),
                str_of(row, "characteristics"),
                str_of(row, "classifications"),
                i64_of(row, "sortOrder"),
                opt_str_of(row, "updatedAt"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    for row in arr_of(structured, "activities") {
        tx.execute(
            "INSERT INTO activities(id, group_id, name, date, category, grading_type, mark, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "groupId"),
                str_of(row, "name"),
                str_of(row, "date"),
                str_of(row, "category"),
                str_of(row, "gradingType"),
                opt_str_of(row, "mark"),
                i64_of(row, "sortOrder"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    for row in arr_of(structured, "grades") {
        tx.execute(
            "INSERT INTO grades(id, activity_id, student_id, value, observation, is_np, details)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "activityId"),
                str_of(row, "studentId"),
                str_of(row, "value"),
                str_of(row, "observation"),
                bool_of(row, "isNP") as i64,
                str_of(row, "details"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    for row in arr_of(structured, "attendance") {
        tx.execute(
            "INSERT INTO attendance(group_id, date, student_id, status, justified)
             VALUES(?, ?, ?, ?, ?)",
            (
                str_of(row, "groupId"),
                str_of(row, "date"),
                str_of(row, "studentId"),
                str_of(row, "status"),
                bool_of(row, "justified") as i64,
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    let agenda = structured.get("agenda").cloned().unwrap_or_else(|| json!({}));
    for row in arr_of(&agenda, "tasks") {
        tx.execute(
            "INSERT INTO agenda_tasks(id, title, date, done, sort_order) VALUES(?, ?, ?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "title"),
                opt_str_of(row, "date"),
                bool_of(row, "done") as i64,
                i64_of(row, "sortOrder"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }
    for row in arr_of(&agenda, "meetings") {
        tx.execute(
            "INSERT INTO agenda_meetings(id, title, date, time, notes) VALUES(?, ?, ?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "title"),
                str_of(row, "date"),
                opt_str_of(row, "time"),
                str_of(row, "notes"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }
    for row in arr_of(&agenda, "notes") {
        tx.execute(
            "INSERT INTO agenda_notes(id, text, date) VALUES(?, ?, ?)",
            (
                str_of(row, "id"),
                str_of(row, "text"),
                opt_str_of(row, "date"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }
    for row in arr_of(&agenda, "highlights") {
        tx.execute(
            "INSERT INTO agenda_highlights(date, color, label) VALUES(?, ?, ?)",
            (
                str_of(row, "date"),
                opt_str_of(row, "color"),
                opt_str_of(row, "label"),
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    for row in arr_of(structured, "settings") {
        let value = row.get("value").cloned().unwrap_or(serde_json::Value::Null);
        tx.execute(
            "INSERT INTO settings(key, value) VALUES(?, ?)",
            (
                str_of(row, "key"),
                serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string()),
            ),
        )
        .map_err(|e| e.to_string())?;
    }

    Ok(())
}

fn restore_in_tx(conn: &Connection, structured: &serde_json::Value) -> Result<(), (String, String)> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| ("db_tx_failed".to_string(), e.to_string()))?;
    if let Err(message) = restore_structured(&tx, structured) {
        let _ = tx.rollback();
        return Err(("db_update_failed".to_string(), message));
    }
    tx.commit()
        .map_err(|e| ("db_commit_failed".to_string(), e.to_string()))?;
    Ok(())
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let structured = match collect_structured(conn) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let out = PathBuf::from(&out_path);
    let export = match backup::write_backup_file(&out, structured, env!("CARGO_PKG_VERSION")) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };
    log::info!("backup exported to {}", out_path);

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "format": export.format,
            "checksum": export.checksum
        }),
    )
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let in_path = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "backup file not found",
            Some(json!({ "path": in_path })),
        );
    }
    let document = match backup::read_document(&src) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            )
        }
    };
    let structured = match backup::validate_document(&document) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };

    if let Err((code, message)) = restore_in_tx(conn, &structured) {
        return err(&req.id, &code, message, None);
    }
    log::info!("backup imported from {}", in_path);

    ok(&req.id, json!({ "ok": true, "path": in_path }))
}

fn handle_snapshot_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let structured = match collect_structured(conn) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let payload = match serde_json::to_string(&structured) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let snapshot_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO snapshots(id, name, created_at, payload) VALUES(?, ?, ?, ?)",
        (&snapshot_id, &name, &created_at, &payload),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "snapshots" })),
        );
    }

    ok(
        &req.id,
        json!({
            "snapshotId": snapshot_id,
            "name": name,
            "createdAt": created_at
        }),
    )
}

fn handle_snapshot_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, created_at, LENGTH(payload) FROM snapshots ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
                "payloadBytes": r.get::<_, i64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(snapshots) => ok(&req.id, json!({ "snapshots": snapshots })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_snapshot_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snapshot_id = match required_str(req, "snapshotId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    use rusqlite::OptionalExtension;
    let payload: Option<String> = match conn
        .query_row(
            "SELECT payload FROM snapshots WHERE id = ?",
            [&snapshot_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(payload) = payload else {
        return err(&req.id, "not_found", "snapshot not found", None);
    };
    let structured: serde_json::Value = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err((code, message)) = restore_in_tx(conn, &structured) {
        return err(&req.id, &code, message, None);
    }
    log::info!("snapshot restored: {}", snapshot_id);

    ok(&req.id, json!({ "ok": true }))
}

fn handle_snapshot_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snapshot_id = match required_str(req, "snapshotId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let deleted = match conn.execute("DELETE FROM snapshots WHERE id = ?", [&snapshot_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "snapshots" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "snapshot not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        "backup.snapshotCreate" => Some(handle_snapshot_create(state, req)),
        "backup.snapshotList" => Some(handle_snapshot_list(state, req)),
        "backup.snapshotRestore" => Some(handle_snapshot_restore(state, req)),
        "backup.snapshotDelete" => Some(handle_snapshot_delete(state, req)),
        _ => None,
    }
}
