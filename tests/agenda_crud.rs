mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, spawn_sidecar};

#[test]
fn tasks_sort_open_before_done_and_toggle() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-agenda-tasks");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "agenda.tasks.create",
        json!({ "title": "Print exam copies", "date": "2026-02-03" }),
    );
    let first_id = first["taskId"].as_str().expect("taskId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "agenda.tasks.create",
        json!({ "title": "Call families" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "done",
        "agenda.tasks.update",
        json!({ "taskId": first_id, "patch": { "done": true } }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "lst", "agenda.tasks.list", json!({}));
    let tasks = listed["tasks"].as_array().expect("tasks");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["title"].as_str(), Some("Call families"));
    assert_eq!(tasks[1]["done"].as_bool(), Some(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "agenda.tasks.delete",
        json!({ "taskId": first_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "gone",
        "agenda.tasks.delete",
        json!({ "taskId": first_id }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn meetings_require_a_date_and_sort_by_it() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-agenda-meetings");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "nodate",
        "agenda.meetings.create",
        json!({ "title": "Staff meeting" }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "agenda.meetings.create",
        json!({
            "title": "Department sync",
            "date": "2026-03-20",
            "time": "17:30",
            "notes": "bring grade reports"
        }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "agenda.meetings.create",
        json!({ "title": "Parent meeting", "date": "2026-03-05" }),
    );
    let second_id = second["meetingId"].as_str().expect("meetingId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "upd",
        "agenda.meetings.update",
        json!({ "meetingId": second_id, "patch": { "notes": "room 12" } }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "lst",
        "agenda.meetings.list",
        json!({}),
    );
    let meetings = listed["meetings"].as_array().expect("meetings");
    assert_eq!(meetings[0]["title"].as_str(), Some("Parent meeting"));
    assert_eq!(meetings[0]["notes"].as_str(), Some("room 12"));
    assert_eq!(meetings[1]["time"].as_str(), Some("17:30"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn notes_and_highlights_round_trip() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-agenda-notes");

    let note = request_ok(
        &mut stdin,
        &mut reader,
        "n1",
        "agenda.notes.create",
        json!({ "text": "Ask about lab access", "date": "2026-04-01" }),
    );
    let note_id = note["noteId"].as_str().expect("noteId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "n2",
        "agenda.notes.update",
        json!({ "noteId": note_id, "patch": { "text": "Lab access granted" } }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "n3", "agenda.notes.list", json!({}));
    assert_eq!(
        listed["notes"][0]["text"].as_str(),
        Some("Lab access granted")
    );

    // Setting the same date twice overwrites rather than duplicating.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "agenda.highlights.set",
        json!({ "date": "2026-04-10", "color": "#ff9800", "label": "field trip" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "agenda.highlights.set",
        json!({ "date": "2026-04-10", "color": "#f44336", "label": "exam day" }),
    );
    let highlights = request_ok(
        &mut stdin,
        &mut reader,
        "h3",
        "agenda.highlights.list",
        json!({}),
    );
    let rows = highlights["highlights"].as_array().expect("highlights");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["label"].as_str(), Some("exam day"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h4",
        "agenda.highlights.clear",
        json!({ "date": "2026-04-10" }),
    );
    let highlights = request_ok(
        &mut stdin,
        &mut reader,
        "h5",
        "agenda.highlights.list",
        json!({}),
    );
    assert_eq!(
        highlights["highlights"].as_array().map(|v| v.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
