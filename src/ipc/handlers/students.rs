use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
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

fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn require_group(conn: &Connection, group_id: &str) -> Result<(), HandlerErr> {
    if !group_exists(conn, group_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }
    Ok(())
}

fn student_row_json(
    id: String,
    name: String,
    observations: String,
    characteristics: String,
    classifications: String,
    sort_order: i64,
    updated_at: Option<String>,
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "observations": observations,
        "characteristics": characteristics,
        "classifications": classifications,
        "sortOrder": sort_order,
        "updatedAt": updated_at
    })
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    require_group(conn, &group_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, observations, characteristics, classifications, sort_order, updated_at
             FROM students
             WHERE group_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let students = stmt
        .query_map([&group_id], |r| {
            Ok(student_row_json(
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    Ok(json!({ "students": students }))
}

fn students_create(
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
    require_group(conn, &group_id)?;

    let text_field = |key: &str| -> String {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let student_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(
            id, group_id, name, observations, characteristics, classifications,
            sort_order, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &group_id,
            &name,
            text_field("observations"),
            text_field("characteristics"),
            text_field("classifications"),
            next_sort,
            &now,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "sortOrder": next_sort }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "patch must be an object".to_string(),
            details: None,
        });
    };

    let current: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT name, observations, characteristics, classifications
             FROM students WHERE group_id = ? AND id = ?",
            (&group_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let Some((mut name, mut observations, mut characteristics, mut classifications)) = current
    else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

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
            "observations" | "characteristics" | "classifications" => {
                let Some(text) = v.as_str() else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: format!("{} must be a string", k),
                        details: None,
                    });
                };
                match k.as_str() {
                    "observations" => observations = text.trim().to_string(),
                    "characteristics" => characteristics = text.trim().to_string(),
                    _ => classifications = text.trim().to_string(),
                }
            }
            other => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("unknown student field: {}", other),
                    details: None,
                })
            }
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE students
         SET name = ?, observations = ?, characteristics = ?, classifications = ?, updated_at = ?
         WHERE group_id = ? AND id = ?",
        (
            &name,
            &observations,
            &characteristics,
            &classifications,
            &now,
            &group_id,
            &student_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn students_reorder(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    require_group(conn, &group_id)?;
    let Some(ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing studentIds".to_string(),
            details: None,
        });
    };
    let ids: Vec<String> = ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    if ids.len() != ids_json.len() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "studentIds must be strings".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE group_id = ?")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let members = stmt
        .query_map([&group_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let member_set: std::collections::HashSet<&str> =
        members.iter().map(|s| s.as_str()).collect();
    let listed_set: std::collections::HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
    if listed_set.len() != ids.len() || member_set != listed_set {
        return Err(HandlerErr {
            code: "bad_params",
            message: "studentIds must be a permutation of the group's students".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (i, student_id) in ids.iter().enumerate() {
        tx.execute(
            "UPDATE students SET sort_order = ? WHERE group_id = ? AND id = ?",
            (i as i64, &group_id, student_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let student_id = get_required_str(params, "studentId")?;

    let exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE group_id = ? AND id = ?",
            (&group_id, &student_id),
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
            message: "student not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (sql, table) in [
        ("DELETE FROM grades WHERE student_id = ?", "grades"),
        ("DELETE FROM attendance WHERE student_id = ?", "attendance"),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        tx.execute(sql, [&student_id]).map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        })?;
    }
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
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.reorder" => Some(with_conn(state, req, students_reorder)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
