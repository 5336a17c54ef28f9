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

fn parse_optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(raw) = v.as_str() else {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("{} must be string or null", key),
                    details: None,
                });
            };
            if raw.trim().is_empty() {
                return Ok(None);
            }
            parse_date(raw).map(Some)
        }
    }
}

// tasks

fn tasks_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, date, done, sort_order
             FROM agenda_tasks
             ORDER BY done, COALESCE(date, '9999-12-31'), sort_order",
        )
        .map_err(db_err)?;
    let tasks = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "date": r.get::<_, Option<String>>(2)?,
                "done": r.get::<_, i64>(3)? != 0,
                "sortOrder": r.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "tasks": tasks }))
}

fn tasks_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "title must not be empty".to_string(),
            details: None,
        });
    }
    let date = parse_optional_date(params, "date")?;
    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM agenda_tasks",
            [],
            |r| r.get(0),
        )
        .map_err(db_err)?;

    let task_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO agenda_tasks(id, title, date, done, sort_order) VALUES(?, ?, ?, 0, ?)",
        (&task_id, &title, &date, next_sort),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "agenda_tasks" })),
    })?;
    Ok(json!({ "taskId": task_id }))
}

fn tasks_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let task_id = get_required_str(params, "taskId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "patch must be an object".to_string(),
            details: None,
        });
    };

    let current: Option<(String, Option<String>, bool)> = conn
        .query_row(
            "SELECT title, date, done FROM agenda_tasks WHERE id = ?",
            [&task_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get::<_, i64>(2)? != 0)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((mut title, mut date, mut done)) = current else {
        return Err(HandlerErr {
            code: "not_found",
            message: "task not found".to_string(),
            details: None,
        });
    };

    for (k, v) in patch {
        match k.as_str() {
            "title" => {
                let Some(text) = v.as_str().map(str::trim).filter(|t| !t.is_empty()) else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "title must be a non-empty string".to_string(),
                        details: None,
                    });
                };
                title = text.to_string();
            }
            "date" => {
                date = parse_optional_date(&json!({ "date": v }), "date")?;
            }
            "done" => {
                done = v.as_bool().ok_or_else(|| HandlerErr {
                    code: "bad_params",
                    message: "done must be boolean".to_string(),
                    details: None,
                })?;
            }
            other => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("unknown task field: {}", other),
                    details: None,
                })
            }
        }
    }

    conn.execute(
        "UPDATE agenda_tasks SET title = ?, date = ?, done = ? WHERE id = ?",
        (&title, &date, done as i64, &task_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "agenda_tasks" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn tasks_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let task_id = get_required_str(params, "taskId")?;
    let deleted = conn
        .execute("DELETE FROM agenda_tasks WHERE id = ?", [&task_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "agenda_tasks" })),
        })?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "task not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "ok": true }))
}

// meetings

fn meetings_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, date, time, notes
             FROM agenda_meetings
             ORDER BY date, COALESCE(time, '')",
        )
        .map_err(db_err)?;
    let meetings = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "time": r.get::<_, Option<String>>(3)?,
                "notes": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "meetings": meetings }))
}

fn meetings_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "title must not be empty".to_string(),
            details: None,
        });
    }
    let date = parse_date(&get_required_str(params, "date")?)?;
    let time = params
        .get("time")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let notes = params
        .get("notes")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    let meeting_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO agenda_meetings(id, title, date, time, notes) VALUES(?, ?, ?, ?, ?)",
        (&meeting_id, &title, &date, &time, &notes),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "agenda_meetings" })),
    })?;
    Ok(json!({ "meetingId": meeting_id }))
}

fn meetings_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let meeting_id = get_required_str(params, "meetingId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "patch must be an object".to_string(),
            details: None,
        });
    };

    let current: Option<(String, String, Option<String>, String)> = conn
        .query_row(
            "SELECT title, date, time, notes FROM agenda_meetings WHERE id = ?",
            [&meeting_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((mut title, mut date, mut time, mut notes)) = current else {
        return Err(HandlerErr {
            code: "not_found",
            message: "meeting not found".to_string(),
            details: None,
        });
    };

    for (k, v) in patch {
        match k.as_str() {
            "title" => {
                let Some(text) = v.as_str().map(str::trim).filter(|t| !t.is_empty()) else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "title must be a non-empty string".to_string(),
                        details: None,
                    });
                };
                title = text.to_string();
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
            "time" => {
                time = if v.is_null() {
                    None
                } else {
                    match v.as_str() {
                        Some(t) => Some(t.trim().to_string()).filter(|t| !t.is_empty()),
                        None => {
                            return Err(HandlerErr {
                                code: "bad_params",
                                message: "time must be string or null".to_string(),
                                details: None,
                            })
                        }
                    }
                };
            }
            "notes" => {
                let Some(text) = v.as_str() else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "notes must be a string".to_string(),
                        details: None,
                    });
                };
                notes = text.trim().to_string();
            }
            other => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("unknown meeting field: {}", other),
                    details: None,
                })
            }
        }
    }

    conn.execute(
        "UPDATE agenda_meetings SET title = ?, date = ?, time = ?, notes = ? WHERE id = ?",
        (&title, &date, &time, &notes, &meeting_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "agenda_meetings" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn meetings_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let meeting_id = get_required_str(params, "meetingId")?;
    let deleted = conn
        .execute("DELETE FROM agenda_meetings WHERE id = ?", [&meeting_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "agenda_meetings" })),
        })?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "meeting not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "ok": true }))
}

// notes

fn notes_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, text, date FROM agenda_notes ORDER BY COALESCE(date, '9999-12-31'), id",
        )
        .map_err(db_err)?;
    let notes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "text": r.get::<_, String>(1)?,
                "date": r.get::<_, Option<String>>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "notes": notes }))
}

fn notes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let text = get_required_str(params, "text")?.trim().to_string();
    if text.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "text must not be empty".to_string(),
            details: None,
        });
    }
    let date = parse_optional_date(params, "date")?;

    let note_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO agenda_notes(id, text, date) VALUES(?, ?, ?)",
        (&note_id, &text, &date),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "agenda_notes" })),
    })?;
    Ok(json!({ "noteId": note_id }))
}

fn notes_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let note_id = get_required_str(params, "noteId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "patch must be an object".to_string(),
            details: None,
        });
    };

    let current: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT text, date FROM agenda_notes WHERE id = ?",
            [&note_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((mut text, mut date)) = current else {
        return Err(HandlerErr {
            code: "not_found",
            message: "note not found".to_string(),
            details: None,
        });
    };

    for (k, v) in patch {
        match k.as_str() {
            "text" => {
                let Some(t) = v.as_str().map(str::trim).filter(|t| !t.is_empty()) else {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "text must be a non-empty string".to_string(),
                        details: None,
                    });
                };
                text = t.to_string();
            }
            "date" => {
                date = parse_optional_date(&json!({ "date": v }), "date")?;
            }
            other => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("unknown note field: {}", other),
                    details: None,
                })
            }
        }
    }

    conn.execute(
        "UPDATE agenda_notes SET text = ?, date = ? WHERE id = ?",
        (&text, &date, &note_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "agenda_notes" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn notes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let note_id = get_required_str(params, "noteId")?;
    let deleted = conn
        .execute("DELETE FROM agenda_notes WHERE id = ?", [&note_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "agenda_notes" })),
        })?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "note not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "ok": true }))
}

// highlighted dates

fn highlights_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT date, color, label FROM agenda_highlights ORDER BY date")
        .map_err(db_err)?;
    let highlights = stmt
        .query_map([], |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "color": r.get::<_, Option<String>>(1)?,
                "label": r.get::<_, Option<String>>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "highlights": highlights }))
}

fn highlights_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = parse_date(&get_required_str(params, "date")?)?;
    let color = params
        .get("color")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let label = params
        .get("label")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    conn.execute(
        "INSERT INTO agenda_highlights(date, color, label) VALUES(?, ?, ?)
         ON CONFLICT(date) DO UPDATE SET
           color = excluded.color,
           label = excluded.label",
        (&date, &color, &label),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "agenda_highlights" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn highlights_clear(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = parse_date(&get_required_str(params, "date")?)?;
    conn.execute("DELETE FROM agenda_highlights WHERE date = ?", [&date])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "agenda_highlights" })),
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
        "agenda.tasks.list" => Some(with_conn(state, req, tasks_list)),
        "agenda.tasks.create" => Some(with_conn(state, req, tasks_create)),
        "agenda.tasks.update" => Some(with_conn(state, req, tasks_update)),
        "agenda.tasks.delete" => Some(with_conn(state, req, tasks_delete)),
        "agenda.meetings.list" => Some(with_conn(state, req, meetings_list)),
        "agenda.meetings.create" => Some(with_conn(state, req, meetings_create)),
        "agenda.meetings.update" => Some(with_conn(state, req, meetings_update)),
        "agenda.meetings.delete" => Some(with_conn(state, req, meetings_delete)),
        "agenda.notes.list" => Some(with_conn(state, req, notes_list)),
        "agenda.notes.create" => Some(with_conn(state, req, notes_create)),
        "agenda.notes.update" => Some(with_conn(state, req, notes_update)),
        "agenda.notes.delete" => Some(with_conn(state, req, notes_delete)),
        "agenda.highlights.list" => Some(with_conn(state, req, highlights_list)),
        "agenda.highlights.set" => Some(with_conn(state, req, highlights_set)),
        "agenda.highlights.clear" => Some(with_conn(state, req, highlights_clear)),
        _ => None,
    }
}
