use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::{db, xlsx};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{attendance, grades};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

struct GroupHeader {
    subject: String,
    grade_level: String,
    group_letter: String,
}

impl GroupHeader {
    fn display_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.subject, self.grade_level, self.group_letter
        )
    }

    fn json(&self, group_id: &str) -> serde_json::Value {
        json!({
            "id": group_id,
            "subject": self.subject,
            "gradeLevel": self.grade_level,
            "groupLetter": self.group_letter,
            "displayKey": self.display_key()
        })
    }
}

fn group_header(conn: &Connection, group_id: &str) -> Result<Option<GroupHeader>, String> {
    conn.query_row(
        "SELECT subject, grade_level, group_letter FROM groups WHERE id = ?",
        [group_id],
        |r| {
            Ok(GroupHeader {
                subject: r.get(0)?,
                grade_level: r.get(1)?,
                group_letter: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(|e| e.to_string())
}

/// Rosters are entered "Surname(s) Firstname", so the last whitespace token
/// is the first name. A single-token name has no surname part.
fn split_name(name: &str) -> (String, String) {
    let tokens: Vec<&str> = name.split_whitespace().collect();
    match tokens.as_slice() {
        [] => (String::new(), String::new()),
        [only] => (String::new(), only.to_string()),
        [rest @ .., first] => (rest.join(" "), first.to_string()),
    }
}

fn rule_for(conn: &Connection, code: &str) -> Result<Option<grading::GradingRule>, String> {
    if let Some(rule) = grading::builtin_rule(code) {
        return Ok(Some(rule));
    }
    let Some(custom_id) = code.strip_prefix("custom:") else {
        return Ok(None);
    };
    let row: Option<(String, Option<String>, Option<f64>, Option<f64>, Option<i64>)> = conn
        .query_row(
            "SELECT kind, values_json, min, max, allow_decimals
             FROM custom_grading_types WHERE id = ?",
            [custom_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| e.to_string())?;
    Ok(row.and_then(|(kind, values_json, min, max, allow_decimals)| match kind.as_str() {
        "values" => {
            let values: Vec<String> = values_json
                .as_deref()
                .and_then(|t| serde_json::from_str(t).ok())
                .unwrap_or_default();
            (!values.is_empty()).then_some(grading::GradingRule::Values(values))
        }
        "range" => Some(grading::GradingRule::NumericRange {
            min: min.unwrap_or(0.0),
            max: max.unwrap_or(10.0),
            allow_decimals: allow_decimals.unwrap_or(1) != 0,
        }),
        _ => None,
    }))
}

struct ActivityCol {
    id: String,
    name: String,
    date: String,
    rule: Option<grading::GradingRule>,
}

fn load_activity_columns(conn: &Connection, group_id: &str) -> Result<Vec<ActivityCol>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, date, grading_type
             FROM activities WHERE group_id = ?
             ORDER BY date, sort_order",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    let mut cols = Vec::with_capacity(rows.len());
    for (id, name, date, grading_type) in rows {
        let rule = rule_for(conn, &grading_type)?;
        cols.push(ActivityCol {
            id,
            name,
            date,
            rule,
        });
    }
    Ok(cols)
}

struct GradeCell {
    value: String,
    is_np: bool,
}

fn load_grade_cells(
    conn: &Connection,
    group_id: &str,
) -> Result<HashMap<(String, String), GradeCell>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT g.activity_id, g.student_id, g.value, g.is_np
             FROM grades g
             JOIN activities a ON a.id = g.activity_id
             WHERE a.group_id = ?",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    let mut cells = HashMap::new();
    for (activity_id, student_id, value, is_np) in rows {
        cells.insert((activity_id, student_id), GradeCell { value, is_np });
    }
    Ok(cells)
}

fn load_roster(conn: &Connection, group_id: &str) -> Result<Vec<(String, String, String)>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, observations FROM students WHERE group_id = ? ORDER BY sort_order",
        )
        .map_err(|e| e.to_string())?;
    stmt.query_map([group_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
        ))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| e.to_string())
}

fn setup_string(conn: &Connection, section_key: &str, field: &str, default: &str) -> String {
    db::settings_get_json(conn, section_key)
        .ok()
        .flatten()
        .and_then(|v| v.get(field).and_then(|f| f.as_str().map(|s| s.to_string())))
        .unwrap_or_else(|| default.to_string())
}

fn setup_bool(conn: &Connection, section_key: &str, field: &str, default: bool) -> bool {
    db::settings_get_json(conn, section_key)
        .ok()
        .flatten()
        .and_then(|v| v.get(field).and_then(|f| f.as_bool()))
        .unwrap_or(default)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn handle_group_summary_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let header = match group_header(conn, &group_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "group not found", None),
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let roster = match load_roster(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let columns = match load_activity_columns(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let cells = match load_grade_cells(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };

    let students_json: Vec<serde_json::Value> = roster
        .iter()
        .map(|(student_id, name, _)| {
            let mut graded = 0usize;
            let mut np = 0usize;
            let mut numeric: Vec<f64> = Vec::new();
            for col in &columns {
                let Some(cell) = cells.get(&(col.id.clone(), student_id.clone())) else {
                    continue;
                };
                if cell.is_np {
                    np += 1;
                    continue;
                }
                graded += 1;
                if let Some(rule) = &col.rule {
                    if let Some(n) = grading::numeric_grade(rule, &cell.value) {
                        numeric.push(n);
                    }
                }
            }
            json!({
                "studentId": student_id,
                "name": name,
                "gradedCount": graded,
                "npCount": np,
                "numericAverage": mean(&numeric)
            })
        })
        .collect();

    let activities_json: Vec<serde_json::Value> = columns
        .iter()
        .map(|col| {
            let mut graded = 0usize;
            let mut np = 0usize;
            let mut numeric: Vec<f64> = Vec::new();
            for (student_id, _, _) in &roster {
                let Some(cell) = cells.get(&(col.id.clone(), student_id.clone())) else {
                    continue;
                };
                if cell.is_np {
                    np += 1;
                    continue;
                }
                graded += 1;
                if let Some(rule) = &col.rule {
                    if let Some(n) = grading::numeric_grade(rule, &cell.value) {
                        numeric.push(n);
                    }
                }
            }
            json!({
                "activityId": col.id,
                "name": col.name,
                "date": col.date,
                "gradedCount": graded,
                "npCount": np,
                "numericAverage": mean(&numeric)
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "group": header.json(&group_id),
            "students": students_json,
            "activities": activities_json
        }),
    )
}

fn handle_activity_grades_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    {
        let conn = match db_conn(state, req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        match group_header(conn, &group_id) {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", "group not found", None),
            Err(message) => return err(&req.id, "db_query_failed", message, None),
        }
    }

    // Reuse the canonical activity-open handler for the model shape and
    // error semantics.
    let open_req = Request {
        id: req.id.clone(),
        method: "grades.activityOpen".to_string(),
        params: req.params.clone(),
    };
    let Some(open_resp) = grades::try_handle(state, &open_req) else {
        return err(
            &req.id,
            "server_error",
            "grades.activityOpen handler missing",
            None,
        );
    };
    if open_resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        return open_resp;
    }
    let model = open_resp
        .get("result")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let header = match group_header(conn, &group_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "group not found", None),
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };

    ok(
        &req.id,
        json!({
            "group": header.json(&group_id),
            "activity": model.get("activity").cloned().unwrap_or_else(|| json!({})),
            "rows": model.get("rows").cloned().unwrap_or_else(|| json!([]))
        }),
    )
}

fn handle_attendance_summary_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let summary_req = Request {
        id: req.id.clone(),
        method: "attendance.summary".to_string(),
        params: req.params.clone(),
    };
    let Some(summary_resp) = attendance::try_handle(state, &summary_req) else {
        return err(
            &req.id,
            "server_error",
            "attendance.summary handler missing",
            None,
        );
    };
    if summary_resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        return summary_resp;
    }
    let model = summary_resp
        .get("result")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let header = match group_header(conn, &group_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "group not found", None),
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };

    ok(
        &req.id,
        json!({
            "group": header.json(&group_id),
            "attendance": model
        }),
    )
}

fn handle_export_group_xlsx(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let header = match group_header(conn, &group_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "group not found", None),
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let roster = match load_roster(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let columns = match load_activity_columns(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let cells = match load_grade_cells(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let np_label = setup_string(conn, "setup.grading", "npLabel", "NP");
    let include_attendance = setup_bool(conn, "setup.reports", "includeAttendanceSheet", true);

    let mut grades_rows: Vec<Vec<String>> = Vec::with_capacity(roster.len() + 1);
    let mut head = vec!["Last name".to_string(), "First name".to_string()];
    for col in &columns {
        head.push(format!("{} ({})", col.name, col.date));
    }
    grades_rows.push(head);
    for (student_id, name, _) in &roster {
        let (last, first) = split_name(name);
        let mut row = vec![last, first];
        for col in &columns {
            let cell = cells.get(&(col.id.clone(), student_id.clone()));
            row.push(match cell {
                Some(c) if c.is_np => np_label.clone(),
                Some(c) => c.value.clone(),
                None => String::new(),
            });
        }
        grades_rows.push(row);
    }

    let mut sheets = vec![xlsx::Sheet {
        name: "Grades".to_string(),
        rows: grades_rows,
    }];

    if include_attendance {
        let counts = match attendance::summary_counts(conn, &group_id, None, None) {
            Ok(v) => v,
            Err(message) => return err(&req.id, "db_query_failed", message, None),
        };
        let mut att_rows: Vec<Vec<String>> = Vec::with_capacity(roster.len() + 1);
        let mut head = vec!["Student".to_string()];
        head.extend(grading::ATTENDANCE_CYCLE.iter().map(|c| c.to_string()));
        head.push("Justified".to_string());
        att_rows.push(head);
        for (student_id, name, _) in &roster {
            let (status_counts, justified) = counts.get(student_id).cloned().unwrap_or_default();
            let mut row = vec![name.clone()];
            for code in grading::ATTENDANCE_CYCLE {
                row.push(status_counts.get(code).copied().unwrap_or(0).to_string());
            }
            row.push(justified.to_string());
            att_rows.push(row);
        }
        sheets.push(xlsx::Sheet {
            name: "Attendance".to_string(),
            rows: att_rows,
        });
    }

    let out = PathBuf::from(&out_path);
    if let Err(e) = xlsx::write_workbook(&out, &sheets) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }
    log::info!(
        "group workbook exported: {} -> {}",
        header.display_key(),
        out_path
    );

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "sheets": sheets.len(),
            "students": roster.len(),
            "activities": columns.len()
        }),
    )
}

fn handle_export_group_txt(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let header = match group_header(conn, &group_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "group not found", None),
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let roster = match load_roster(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let columns = match load_activity_columns(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let cells = match load_grade_cells(conn, &group_id) {
        Ok(v) => v,
        Err(message) => return err(&req.id, "db_query_failed", message, None),
    };
    let show_generated_at = setup_bool(conn, "setup.reports", "showGeneratedAt", true);
    let show_observations = setup_bool(conn, "setup.grading", "showObservationsInReports", true);

    let mut text = String::new();
    text.push_str(&format!("Group: {}\n", header.display_key()));
    text.push_str(&format!(
        "Subject: {}  Grade: {}  Letter: {}\n",
        header.subject, header.grade_level, header.group_letter
    ));
    if show_generated_at {
        text.push_str(&format!("Generated: {}\n", chrono::Utc::now().to_rfc3339()));
    }
    text.push('\n');

    text.push_str(&format!("Students ({}):\n", roster.len()));
    for (_, name, observations) in &roster {
        if show_observations && !observations.is_empty() {
            text.push_str(&format!("  - {} [{}]\n", name, observations));
        } else {
            text.push_str(&format!("  - {}\n", name));
        }
    }
    text.push('\n');

    text.push_str(&format!("Activities ({}):\n", columns.len()));
    for col in &columns {
        let mut graded = 0usize;
        let mut np = 0usize;
        let mut numeric: Vec<f64> = Vec::new();
        for (student_id, _, _) in &roster {
            let Some(cell) = cells.get(&(col.id.clone(), student_id.clone())) else {
                continue;
            };
            if cell.is_np {
                np += 1;
                continue;
            }
            graded += 1;
            if let Some(rule) = &col.rule {
                if let Some(n) = grading::numeric_grade(rule, &cell.value) {
                    numeric.push(n);
                }
            }
        }
        let avg = mean(&numeric)
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "-".to_string());
        text.push_str(&format!(
            "  {}  {}  graded={} np={} avg={}\n",
            col.date, col.name, graded, np, avg
        ));
    }

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out, text) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }
    log::info!(
        "group summary exported: {} -> {}",
        header.display_key(),
        out_path
    );

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "students": roster.len(),
            "activities": columns.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.groupSummaryModel" => Some(handle_group_summary_model(state, req)),
        "reports.activityGradesModel" => Some(handle_activity_grades_model(state, req)),
        "reports.attendanceSummaryModel" => Some(handle_attendance_summary_model(state, req)),
        "reports.exportGroupXlsx" => Some(handle_export_group_xlsx(state, req)),
        "reports.exportGroupTxt" => Some(handle_export_group_txt(state, req)),
        _ => None,
    }
}
