use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_field(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let value = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if value.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("missing {}", key),
            None,
        ));
    }
    Ok(value)
}

// The composite key doubles as the display key in list responses.
fn display_key(subject: &str, grade_level: &str, group_letter: &str) -> String {
    format!("{}-{}-{}", subject, grade_level, group_letter)
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "groups": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           g.id,
           g.subject,
           g.grade_level,
           g.group_letter,
           g.color,
           g.sort_order,
           (SELECT COUNT(*) FROM students s WHERE s.group_id = g.id) AS student_count,
           (SELECT COUNT(*) FROM activities a WHERE a.group_id = g.id) AS activity_count
         FROM groups g
         ORDER BY g.sort_order, g.subject, g.grade_level, g.group_letter",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let subject: String = row.get(1)?;
            let grade_level: String = row.get(2)?;
            let group_letter: String = row.get(3)?;
            let color: Option<String> = row.get(4)?;
            let sort_order: i64 = row.get(5)?;
            let student_count: i64 = row.get(6)?;
            let activity_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "subject": subject,
                "gradeLevel": grade_level,
                "groupLetter": group_letter,
                "displayKey": display_key(&subject, &grade_level, &group_letter),
                "color": color,
                "sortOrder": sort_order,
                "studentCount": student_count,
                "activityCount": activity_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject = match required_field(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_level = match required_field(req, "gradeLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_letter = match required_field(req, "groupLetter") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let color = req
        .params
        .get("color")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM groups WHERE subject = ? AND grade_level = ? AND group_letter = ?",
            (&subject, &grade_level, &group_letter),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "conflict",
            "a group with this subject, grade and letter already exists",
            Some(json!({
                "displayKey": display_key(&subject, &grade_level, &group_letter)
            })),
        );
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM groups",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO groups(id, subject, grade_level, group_letter, color, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &group_id,
            &subject,
            &grade_level,
            &group_letter,
            &color,
            next_sort,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    ok(
        &req.id,
        json!({
            "groupId": group_id,
            "displayKey": display_key(&subject, &grade_level, &group_letter)
        }),
    )
}

fn handle_groups_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let current: Option<(String, String, String, Option<String>)> = match conn
        .query_row(
            "SELECT subject, grade_level, group_letter, color FROM groups WHERE id = ?",
            [&group_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((mut subject, mut grade_level, mut group_letter, mut color)) = current else {
        return err(&req.id, "not_found", "group not found", None);
    };

    for (k, v) in patch {
        match k.as_str() {
            "subject" | "gradeLevel" | "groupLetter" => {
                let Some(text) = v.as_str().map(str::trim).filter(|t| !t.is_empty()) else {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("{} must be a non-empty string", k),
                        None,
                    );
                };
                match k.as_str() {
                    "subject" => subject = text.to_string(),
                    "gradeLevel" => grade_level = text.to_string(),
                    _ => group_letter = text.to_string(),
                }
            }
            "color" => {
                color = if v.is_null() {
                    None
                } else {
                    match v.as_str() {
                        Some(t) => Some(t.trim().to_string()).filter(|t| !t.is_empty()),
                        None => {
                            return err(
                                &req.id,
                                "bad_params",
                                "color must be string or null",
                                None,
                            )
                        }
                    }
                };
            }
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown group field: {}", other),
                    None,
                )
            }
        }
    }

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM groups
             WHERE subject = ? AND grade_level = ? AND group_letter = ? AND id <> ?",
            (&subject, &grade_level, &group_letter, &group_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "conflict",
            "a group with this subject, grade and letter already exists",
            Some(json!({
                "displayKey": display_key(&subject, &grade_level, &group_letter)
            })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE groups SET subject = ?, grade_level = ?, group_letter = ?, color = ? WHERE id = ?",
        (&subject, &grade_level, &group_letter, &color, &group_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "displayKey": display_key(&subject, &grade_level, &group_letter)
        }),
    )
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM grades
         WHERE activity_id IN (SELECT id FROM activities WHERE group_id = ?)",
        [&group_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM attendance WHERE group_id = ?", [&group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM activities WHERE group_id = ?", [&group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "activities" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM students WHERE group_id = ?", [&group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM groups WHERE id = ?", [&group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.update" => Some(handle_groups_update(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        _ => None,
    }
}
