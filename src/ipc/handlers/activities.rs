use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be YYYY-MM-DD".to_string(),
        details: Some(json!({ "date": t })),
    })?;
    Ok(t.to_string())
}

fn require_group(conn: &Connection, group_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }
    Ok(())
}

/// A grading type is either a built-in code or "custom:<id>" referencing a
/// stored custom type.
fn check_grading_type(conn: &Connection, code: &str) -> Result<(), HandlerErr> {
    if grading::is_builtin_grading_type(code) {
        return Ok(());
    }
    if let Some(custom_id) = code.strip_prefix("custom:") {
        let exists = conn
            .query_row(
                "SELECT 1 FROM custom_grading_types WHERE id = ?",
                [custom_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?
            .is_some();
        if exists {
            return Ok(());
        }
        return Err(HandlerErr {
            code: "not_found",
            message: "custom grading type not found".to_string(),
            details: Some(json!({ "gradingType": code })),
        });
    }
    Err(HandlerErr {
        code: "bad_params",
        message: format!(
            "gradingType must be one of {} or custom:<id>",
            grading::BUILTIN_GRADING_TYPES.join(", ")
        ),
        details: Some(json!({ "gradingType": code })),
    })
}

fn activities_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    require_group(conn, &group_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.name, a.date, a.category, a.grading_type, a.mark, a.sort_order,
                    (SELECT COUNT(*) FROM grades g WHERE g.activity_id = a.id) AS grade_count
             FROM activities a
             WHERE a.group_id = ?
             ORDER BY a.date, a.sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let activities = stmt
        .query_map([&group_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "category": r.get::<_, String>(3)?,
                "gradingType": r.get::<_, String>(4)?,
                "mark": r.get::<_, Option<String>>(5)?,
                "sortOrder": r.get::<_, i64>(6)?,
                "gradeCount": r.get::<_, i64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    Ok(json!({ "activities": activities }))
}

fn activities_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be empty".to_string(),
            details: None,
        });
    }
    let date = parse_date(&get_required_str(params, "date")?)?;
    let grading_type = get_required_str(params, "gradingType")?;
    require_group(conn, &group_id)?;
    check_grading_type(conn, &grading_type)?;

    let category = params
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let mark = params
        .get("mark")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM activities WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let activity_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO activities(id, group_id, name, date, category, grading_type, mark, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &activity_id,
            &group_id,
            &name,
            &date,
            &category,
            &grading_type,
            &mark,
            next_sort,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "activities" })),
    })?;

    Ok(json!({ "activityId": activity_id }))
}

fn activities_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let activity_id = get_required_str(params, "activityId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "patch must be an object".to_string(),
            details: None,
        });
    };

    let current: Option<(String, String, String, String, Option<String>)> = conn
        .query_row(
            "SELECT name, date, category, grading_type, mark
             FROM activities WHERE group_id = ? AND id = ?",
            (&group_id, &activity_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let Some((mut name, mut date, mut category, old_grading_type, mut mark)) = current else {
        return Err(HandlerErr {
            code: "not_found",
            message: "activity not found".to_string(),
            details: None,
        });
    };
    let mut grading_type = old_grading_type.clone();

    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let Some(text) = v.as_str().map(str::trim).filter(|t| !t.is_empty()) else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "name must be a non-empty string".to_string(),
                        details: None,
                    });
                };
                name = text.to_string();
            }
            "date" => {
                let Some(text) = v.as_str() else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "date must be a string".to_string(),
                        details: None,
                    });
                };
                date = parse_date(text)?;
            }
            "category" => {
                let Some(text) = v.as_str() else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "category must be a string".to_string(),
                        details: None,
                    });
                };
                category = text.trim().to_string();
            }
            "gradingType" => {
                let Some(text) = v.as_str() else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "gradingType must be a string".to_string(),
                        details: None,
                    });
                };
                check_grading_type(conn, text)?;
                grading_type = text.to_string();
            }
            "mark" => {
                mark = if v.is_null() {
                    None
                } else {
                    match v.as_str() {
                        Some(t) => Some(t.trim().to_string()).filter(|t| !t.is_empty()),
                        None => {
                            return Err(HandlerErr {
                                code: "bad_params",
                                message: "mark must be string or null".to_string(),
                                details: None,
                            })
                        }
                    }
                };
            }
            other => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("unknown activity field: {}", other),
                    details: None,
                })
            }
        }
    }

    let grading_type_changed = grading_type != old_grading_type;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // A different grading type invalidates every recorded entry, so the two
    // writes have to land together.
    let mut cleared_grades = 0usize;
    if grading_type_changed {
        cleared_grades = tx
            .execute("DELETE FROM grades WHERE activity_id = ?", [&activity_id])
            .map_err(|e| HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "grades" })),
            })?;
    }

    tx.execute(
        "UPDATE activities
         SET name = ?, date = ?, category = ?, grading_type = ?, mark = ?
         WHERE group_id = ? AND id = ?",
        (
            &name,
            &date,
            &category,
            &grading_type,
            &mark,
            &group_id,
            &activity_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "activities" })),
    })?;

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "ok": true,
        "gradingTypeChanged": grading_type_changed,
        "clearedGrades": cleared_grades
    }))
}

fn activities_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let activity_id = get_required_str(params, "activityId")?;

    let exists = conn
        .query_row(
            "SELECT 1 FROM activities WHERE group_id = ? AND id = ?",
            (&group_id, &activity_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "activity not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute("DELETE FROM grades WHERE activity_id = ?", [&activity_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grades" })),
        })?;
    tx.execute("DELETE FROM activities WHERE id = ?", [&activity_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "activities" })),
        })?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true }))
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
        "activities.list" => Some(with_conn(state, req, activities_list)),
        "activities.create" => Some(with_conn(state, req, activities_create)),
        "activities.update" => Some(with_conn(state, req, activities_update)),
        "activities.delete" => Some(with_conn(state, req, activities_delete)),
        _ => None,
    }
}
