use crate::grading;
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

fn db_err(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

struct CustomSpec {
    kind: String,
    values_json: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    allow_decimals: Option<i64>,
}

fn parse_values(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get("values").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "values mode requires values[]".to_string(),
            details: None,
        });
    };
    let mut values: Vec<String> = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(text) = v.as_str().map(str::trim).filter(|t| !t.is_empty()) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "values must be non-empty strings".to_string(),
                details: None,
            });
        };
        if values.iter().any(|seen| seen.eq_ignore_ascii_case(text)) {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("duplicate value: {}", text),
                details: None,
            });
        }
        values.push(text.to_string());
    }
    if values.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "values must not be empty".to_string(),
            details: None,
        });
    }
    Ok(values)
}

fn parse_spec(params: &serde_json::Value) -> Result<CustomSpec, HandlerErr> {
    let kind = get_required_str(params, "kind")?.trim().to_ascii_lowercase();
    match kind.as_str() {
        "values" => {
            let values = parse_values(params)?;
            let values_json = serde_json::to_string(&values).map_err(|e| HandlerErr {
                code: "bad_params",
                message: e.to_string(),
                details: None,
            })?;
            Ok(CustomSpec {
                kind,
                values_json: Some(values_json),
                min: None,
                max: None,
                allow_decimals: None,
            })
        }
        "range" => {
            let min = params.get("min").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let max = params.get("max").and_then(|v| v.as_f64()).unwrap_or(10.0);
            if !min.is_finite() || !max.is_finite() || min >= max {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "range requires finite min < max".to_string(),
                    details: Some(json!({ "min": min, "max": max })),
                });
            }
            let allow_decimals = params
                .get("allowDecimals")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            Ok(CustomSpec {
                kind,
                values_json: None,
                min: Some(min),
                max: Some(max),
                allow_decimals: Some(allow_decimals as i64),
            })
        }
        other => Err(HandlerErr {
            code: "bad_params",
            message: format!("kind must be values or range, got: {}", other),
            details: None,
        }),
    }
}

fn name_taken(conn: &Connection, name: &str, exclude_id: Option<&str>) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM custom_grading_types WHERE name = ?1 AND (?2 IS NULL OR id <> ?2)",
        (name, exclude_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn usage_count(conn: &Connection, custom_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM activities WHERE grading_type = ?",
        [format!("custom:{}", custom_id)],
        |r| r.get(0),
    )
    .map_err(db_err)
}

fn custom_row_json(
    id: String,
    name: String,
    kind: String,
    values_json: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    allow_decimals: Option<i64>,
) -> serde_json::Value {
    let values: Option<Vec<String>> =
        values_json.and_then(|t| serde_json::from_str(&t).ok());
    json!({
        "id": id,
        "code": format!("custom:{}", id),
        "name": name,
        "kind": kind,
        "values": values,
        "min": min,
        "max": max,
        "allowDecimals": allow_decimals.map(|v| v != 0)
    })
}

fn grading_types_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let builtins: Vec<serde_json::Value> = grading::BUILTIN_GRADING_TYPES
        .iter()
        .map(|code| json!({ "code": code, "builtin": true }))
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT id, name, kind, values_json, min, max, allow_decimals
             FROM custom_grading_types
             ORDER BY name",
        )
        .map_err(db_err)?;
    let customs = stmt
        .query_map([], |r| {
            Ok(custom_row_json(
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
        .map_err(db_err)?;

    Ok(json!({ "builtin": builtins, "custom": customs }))
}

fn grading_types_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be empty".to_string(),
            details: None,
        });
    }
    if name_taken(conn, &name, None)? {
        return Err(HandlerErr {
            code: "conflict",
            message: "a grading type with this name already exists".to_string(),
            details: Some(json!({ "name": name })),
        });
    }
    let spec = parse_spec(params)?;

    let custom_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO custom_grading_types(id, name, kind, values_json, min, max, allow_decimals)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &custom_id,
            &name,
            &spec.kind,
            &spec.values_json,
            spec.min,
            spec.max,
            spec.allow_decimals,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "custom_grading_types" })),
    })?;

    Ok(json!({
        "gradingTypeId": custom_id,
        "code": format!("custom:{}", custom_id)
    }))
}

fn grading_types_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let custom_id = get_required_str(params, "gradingTypeId")?;

    let exists = conn
        .query_row(
            "SELECT 1 FROM custom_grading_types WHERE id = ?",
            [&custom_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_err)?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "custom grading type not found".to_string(),
            details: None,
        });
    }

    if let Some(name_raw) = params.get("name").and_then(|v| v.as_str()) {
        let name = name_raw.trim().to_string();
        if name.is_empty() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "name must not be empty".to_string(),
                details: None,
            });
        }
        if name_taken(conn, &name, Some(&custom_id))? {
            return Err(HandlerErr {
                code: "conflict",
                message: "a grading type with this name already exists".to_string(),
                details: Some(json!({ "name": name })),
            });
        }
        conn.execute(
            "UPDATE custom_grading_types SET name = ? WHERE id = ?",
            (&name, &custom_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "custom_grading_types" })),
        })?;
    }

    // Redefining the value domain would silently invalidate recorded grades,
    // so it is only allowed while no activity references the type.
    if params.get("kind").is_some() {
        let in_use = usage_count(conn, &custom_id)?;
        if in_use > 0 {
            return Err(HandlerErr {
                code: "conflict",
                message: "grading type is used by activities; definition cannot change"
                    .to_string(),
                details: Some(json!({ "activityCount": in_use })),
            });
        }
        let spec = parse_spec(params)?;
        conn.execute(
            "UPDATE custom_grading_types
             SET kind = ?, values_json = ?, min = ?, max = ?, allow_decimals = ?
             WHERE id = ?",
            (
                &spec.kind,
                &spec.values_json,
                spec.min,
                spec.max,
                spec.allow_decimals,
                &custom_id,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "custom_grading_types" })),
        })?;
    }

    Ok(json!({ "ok": true }))
}

fn grading_types_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let custom_id = get_required_str(params, "gradingTypeId")?;
    let in_use = usage_count(conn, &custom_id)?;
    if in_use > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "grading type is used by activities and cannot be deleted".to_string(),
            details: Some(json!({ "activityCount": in_use })),
        });
    }
    let deleted = conn
        .execute("DELETE FROM custom_grading_types WHERE id = ?", [&custom_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "custom_grading_types" })),
        })?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "custom grading type not found".to_string(),
            details: None,
        });
    }
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
        "gradingTypes.list" => Some(with_conn(state, req, grading_types_list)),
        "gradingTypes.create" => Some(with_conn(state, req, grading_types_create)),
        "gradingTypes.update" => Some(with_conn(state, req, grading_types_update)),
        "gradingTypes.delete" => Some(with_conn(state, req, grading_types_delete)),
        _ => None,
    }
}
