use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const BULK_SET_MAX_EDITS: usize = 1000;

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

/// Resolves the validation rule for an activity's grading type, following a
/// custom:<id> reference into the custom_grading_types table.
fn rule_for_grading_type(
    conn: &Connection,
    code: &str,
) -> Result<grading::GradingRule, HandlerErr> {
    if let Some(rule) = grading::builtin_rule(code) {
        return Ok(rule);
    }
    let Some(custom_id) = code.strip_prefix("custom:") else {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("unknown grading type: {}", code),
            details: None,
        });
    };
    let row: Option<(String, Option<String>, Option<f64>, Option<f64>, Option<i64>)> = conn
        .query_row(
            "SELECT kind, values_json, min, max, allow_decimals
             FROM custom_grading_types WHERE id = ?",
            [custom_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((kind, values_json, min, max, allow_decimals)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "custom grading type not found".to_string(),
            details: Some(json!({ "gradingType": code })),
        });
    };

    match kind.as_str() {
        "values" => {
            let values: Vec<String> = values_json
                .as_deref()
                .and_then(|t| serde_json::from_str(t).ok())
                .unwrap_or_default();
            if values.is_empty() {
                return Err(HandlerErr {
                    code: "db_query_failed",
                    message: "custom grading type has no values".to_string(),
                    details: Some(json!({ "gradingType": code })),
                });
            }
            Ok(grading::GradingRule::Values(values))
        }
        "range" => Ok(grading::GradingRule::NumericRange {
            min: min.unwrap_or(0.0),
            max: max.unwrap_or(10.0),
            allow_decimals: allow_decimals.unwrap_or(1) != 0,
        }),
        other => Err(HandlerErr {
            code: "db_query_failed",
            message: format!("custom grading type has unknown kind: {}", other),
            details: None,
        }),
    }
}

fn activity_rule(
    conn: &Connection,
    group_id: &str,
    activity_id: &str,
) -> Result<(String, grading::GradingRule), HandlerErr> {
    let grading_type: Option<String> = conn
        .query_row(
            "SELECT grading_type FROM activities WHERE group_id = ? AND id = ?",
            (group_id, activity_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(grading_type) = grading_type else {
        return Err(HandlerErr {
            code: "not_found",
            message: "activity not found".to_string(),
            details: None,
        });
    };
    let rule = rule_for_grading_type(conn, &grading_type)?;
    Ok((grading_type, rule))
}

fn require_student(conn: &Connection, group_id: &str, student_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE group_id = ? AND id = ?",
            (group_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_err)?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }
    Ok(())
}

struct ResolvedEntry {
    value: String,
    observation: String,
    is_np: bool,
    details: String,
    clear: bool,
}

/// Applies the grading rules to one edit: NP discards any value, an empty
/// value clears the cell, anything else must satisfy the activity's rule.
fn resolve_entry(
    rule: &grading::GradingRule,
    edit: &serde_json::Value,
) -> Result<ResolvedEntry, HandlerErr> {
    let is_np = edit.get("isNP").and_then(|v| v.as_bool()).unwrap_or(false);
    let raw_value = edit
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let observation = edit
        .get("observation")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let details = edit
        .get("details")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    if is_np {
        return Ok(ResolvedEntry {
            value: String::new(),
            observation,
            is_np: true,
            details,
            clear: false,
        });
    }
    if raw_value.is_empty() {
        return Ok(ResolvedEntry {
            value: String::new(),
            observation,
            is_np: false,
            details,
            clear: true,
        });
    }
    let canonical = grading::validate_grade(rule, &raw_value).map_err(|message| HandlerErr {
        code: "bad_params",
        message,
        details: Some(json!({ "value": raw_value })),
    })?;
    Ok(ResolvedEntry {
        value: canonical,
        observation,
        is_np: false,
        details,
        clear: false,
    })
}

fn apply_entry(
    conn: &Connection,
    activity_id: &str,
    student_id: &str,
    entry: &ResolvedEntry,
) -> Result<(), HandlerErr> {
    if entry.clear {
        conn.execute(
            "DELETE FROM grades WHERE activity_id = ? AND student_id = ?",
            (activity_id, student_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grades" })),
        })?;
        return Ok(());
    }
    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(id, activity_id, student_id, value, observation, is_np, details)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(activity_id, student_id) DO UPDATE SET
           value = excluded.value,
           observation = excluded.observation,
           is_np = excluded.is_np,
           details = excluded.details",
        (
            &grade_id,
            activity_id,
            student_id,
            &entry.value,
            &entry.observation,
            entry.is_np as i64,
            &entry.details,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "grades" })),
    })?;
    Ok(())
}

fn grades_activity_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let activity_id = get_required_str(params, "activityId")?;

    let activity: Option<(String, String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT name, date, category, grading_type, mark
             FROM activities WHERE group_id = ? AND id = ?",
            (&group_id, &activity_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((name, date, category, grading_type, mark)) = activity else {
        return Err(HandlerErr {
            code: "not_found",
            message: "activity not found".to_string(),
            details: None,
        });
    };

    let mut entry_stmt = conn
        .prepare(
            "SELECT student_id, value, observation, is_np, details
             FROM grades WHERE activity_id = ?",
        )
        .map_err(db_err)?;
    let entry_rows = entry_stmt
        .query_map([&activity_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    let mut by_student: HashMap<String, serde_json::Value> = HashMap::new();
    for (student_id, value, observation, is_np, details) in entry_rows {
        by_student.insert(
            student_id,
            json!({
                "value": value,
                "observation": observation,
                "isNP": is_np != 0,
                "details": details
            }),
        );
    }

    let mut stud_stmt = conn
        .prepare(
            "SELECT id, name, sort_order FROM students WHERE group_id = ? ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let rows = stud_stmt
        .query_map([&group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let rows_json: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, name, sort_order)| {
            let entry = by_student.get(&id).cloned();
            json!({
                "studentId": id,
                "name": name,
                "sortOrder": sort_order,
                "entry": entry
            })
        })
        .collect();

    Ok(json!({
        "activity": {
            "id": activity_id,
            "name": name,
            "date": date,
            "category": category,
            "gradingType": grading_type,
            "mark": mark
        },
        "rows": rows_json
    }))
}

fn grades_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let activity_id = get_required_str(params, "activityId")?;
    let student_id = get_required_str(params, "studentId")?;

    let (_, rule) = activity_rule(conn, &group_id, &activity_id)?;
    require_student(conn, &group_id, &student_id)?;
    let entry = resolve_entry(&rule, params)?;
    apply_entry(conn, &activity_id, &student_id, &entry)?;

    Ok(json!({ "ok": true, "cleared": entry.clear }))
}

fn grades_bulk_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let activity_id = get_required_str(params, "activityId")?;
    let Some(edits) = params.get("edits").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing edits[]".to_string(),
            details: None,
        });
    };
    if edits.len() > BULK_SET_MAX_EDITS {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!(
                "bulk payload exceeds max edits: {} > {}",
                edits.len(),
                BULK_SET_MAX_EDITS
            ),
            details: None,
        });
    }

    let (_, rule) = activity_rule(conn, &group_id, &activity_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut updated = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (i, edit) in edits.iter().enumerate() {
        let student_id = match edit.get("studentId").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "edit missing studentId"
                }));
                continue;
            }
        };
        if let Err(e) = require_student(&tx, &group_id, &student_id) {
            errors.push(json!({
                "index": i,
                "studentId": student_id,
                "code": e.code,
                "message": e.message
            }));
            continue;
        }
        let entry = match resolve_entry(&rule, edit) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "studentId": student_id,
                    "code": e.code,
                    "message": e.message
                }));
                continue;
            }
        };
        match apply_entry(&tx, &activity_id, &student_id, &entry) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "studentId": student_id,
                "code": e.code,
                "message": e.message
            })),
        }
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut result = json!({ "ok": true, "updated": updated });
    if !errors.is_empty() {
        let obj = result.as_object_mut().expect("result should be object");
        obj.insert("rejected".into(), json!(errors.len()));
        obj.insert("errors".into(), json!(errors));
    }
    Ok(result)
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
        "grades.activityOpen" => Some(with_conn(state, req, grades_activity_open)),
        "grades.set" => Some(with_conn(state, req, grades_set)),
        "grades.bulkSet" => Some(with_conn(state, req, grades_bulk_set)),
        _ => None,
    }
}
