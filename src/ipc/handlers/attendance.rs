use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

#[derive(Debug, Clone)]
struct BasicStudent {
    id: String,
    name: String,
    sort_order: i64,
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn db_err(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be YYYY-MM-DD".to_string(),
        details: Some(json!({ "date": t })),
    })?;
    Ok(t.to_string())
}

fn parse_status(raw: &str) -> Result<String, HandlerErr> {
    let code = raw.trim().to_ascii_uppercase();
    if !grading::is_attendance_status(&code) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!(
                "status must be one of: {}",
                grading::ATTENDANCE_CYCLE.join(", ")
            ),
            details: Some(json!({ "status": raw })),
        });
    }
    Ok(code)
}

fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn student_in_group(
    conn: &Connection,
    group_id: &str,
    student_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM students WHERE group_id = ? AND id = ?",
        (group_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn list_students_for_group(
    conn: &Connection,
    group_id: &str,
) -> Result<Vec<BasicStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, sort_order
             FROM students
             WHERE group_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    stmt.query_map([group_id], |r| {
        Ok(BasicStudent {
            id: r.get(0)?,
            name: r.get(1)?,
            sort_order: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn upsert_record(
    conn: &Connection,
    group_id: &str,
    date: &str,
    student_id: &str,
    status: &str,
    justified: bool,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance(group_id, date, student_id, status, justified)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(group_id, date, student_id) DO UPDATE SET
           status = excluded.status,
           justified = excluded.justified",
        (group_id, date, student_id, status, justified as i64),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;
    Ok(())
}

fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;

    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }
    let students = list_students_for_group(conn, &group_id)?;

    let mut by_student: HashMap<String, (String, bool)> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, status, justified
             FROM attendance
             WHERE group_id = ? AND date = ?",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((&group_id, &date), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    for (student_id, status, justified) in rows {
        by_student.insert(student_id, (status, justified));
    }

    let rows_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let (status, justified) = by_student
                .get(&s.id)
                .cloned()
                .unwrap_or_else(|| ("N".to_string(), false));
            json!({
                "studentId": s.id,
                "name": s.name,
                "sortOrder": s.sort_order,
                "status": status,
                "justified": justified
            })
        })
        .collect();

    Ok(json!({
        "date": date,
        "rows": rows_json
    }))
}

fn attendance_set_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let student_id = get_required_str(params, "studentId")?;
    if !student_in_group(conn, &group_id, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let existing: Option<(String, bool)> = conn
        .query_row(
            "SELECT status, justified FROM attendance
             WHERE group_id = ? AND date = ? AND student_id = ?",
            (&group_id, &date, &student_id),
            |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0)),
        )
        .optional()
        .map_err(db_err)?;
    let (current_status, current_justified) =
        existing.unwrap_or_else(|| ("N".to_string(), false));

    let status = match params.get("status").and_then(|v| v.as_str()) {
        Some(raw) => parse_status(raw)?,
        None => current_status,
    };
    let justified = match params.get("justified") {
        Some(v) if !v.is_null() => v.as_bool().ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "justified must be boolean".to_string(),
            details: None,
        })?,
        _ => current_justified,
    };

    upsert_record(conn, &group_id, &date, &student_id, &status, justified)?;
    Ok(json!({ "ok": true, "status": status, "justified": justified }))
}

fn attendance_cycle_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let student_id = get_required_str(params, "studentId")?;
    if !student_in_group(conn, &group_id, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let existing: Option<(String, bool)> = conn
        .query_row(
            "SELECT status, justified FROM attendance
             WHERE group_id = ? AND date = ? AND student_id = ?",
            (&group_id, &date, &student_id),
            |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0)),
        )
        .optional()
        .map_err(db_err)?;
    let (current, justified) = existing.unwrap_or_else(|| ("N".to_string(), false));
    let next = grading::next_attendance_status(&current);

    upsert_record(conn, &group_id, &date, &student_id, next, justified)?;
    Ok(json!({ "ok": true, "previous": current, "status": next }))
}

fn attendance_bulk_stamp(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let status = parse_status(&get_required_str(params, "status")?)?;
    let justified = params
        .get("justified")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let Some(ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing studentIds".to_string(),
            details: None,
        });
    };
    let student_ids: Vec<String> = ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut stamped = 0usize;
    let mut skipped = 0usize;
    for student_id in student_ids {
        if !student_in_group(&tx, &group_id, &student_id)? {
            skipped += 1;
            continue;
        }
        upsert_record(&tx, &group_id, &date, &student_id, &status, justified)?;
        stamped += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true, "stamped": stamped, "skipped": skipped }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }
    let from = match params.get("from").and_then(|v| v.as_str()) {
        Some(raw) => Some(parse_date(raw)?),
        None => None,
    };
    let to = match params.get("to").and_then(|v| v.as_str()) {
        Some(raw) => Some(parse_date(raw)?),
        None => None,
    };

    let students = list_students_for_group(conn, &group_id)?;
    let rows = summary_rows(conn, &group_id, from.as_deref(), to.as_deref(), &students)?;

    Ok(json!({
        "from": from,
        "to": to,
        "rows": rows
    }))
}

/// Per-student counts of each status plus justified absences. ISO dates
/// compare lexicographically, so the range filter is plain string comparison.
pub fn summary_counts(
    conn: &Connection,
    group_id: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<HashMap<String, (HashMap<String, i64>, i64)>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, status, justified FROM attendance
             WHERE group_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map((group_id, from, to), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    let mut by_student: HashMap<String, (HashMap<String, i64>, i64)> = HashMap::new();
    for (student_id, status, justified) in rows {
        let slot = by_student.entry(student_id).or_default();
        *slot.0.entry(status).or_insert(0) += 1;
        if justified {
            slot.1 += 1;
        }
    }
    Ok(by_student)
}

fn summary_rows(
    conn: &Connection,
    group_id: &str,
    from: Option<&str>,
    to: Option<&str>,
    students: &[BasicStudent],
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let by_student = summary_counts(conn, group_id, from, to).map_err(|message| HandlerErr {
        code: "db_query_failed",
        message,
        details: None,
    })?;

    let rows = students
        .iter()
        .map(|s| {
            let (counts, justified) = by_student.get(&s.id).cloned().unwrap_or_default();
            let counts_json: serde_json::Map<String, serde_json::Value> = grading::ATTENDANCE_CYCLE
                .iter()
                .map(|code| {
                    (
                        code.to_string(),
                        json!(counts.get(*code).copied().unwrap_or(0)),
                    )
                })
                .collect();
            json!({
                "studentId": s.id,
                "name": s.name,
                "counts": counts_json,
                "justified": justified
            })
        })
        .collect();
    Ok(rows)
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(with_conn(state, req, attendance_day_open)),
        "attendance.setStatus" => Some(with_conn(state, req, attendance_set_status)),
        "attendance.cycleStatus" => Some(with_conn(state, req, attendance_cycle_status)),
        "attendance.bulkStamp" => Some(with_conn(state, req, attendance_bulk_stamp)),
        "attendance.summary" => Some(with_conn(state, req, attendance_summary)),
        _ => None,
    }
}
