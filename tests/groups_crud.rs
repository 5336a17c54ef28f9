mod test_support;

use serde_json::json;
use test_support::{create_group, open_workspace, request_err, request_ok, spawn_sidecar};

#[test]
fn group_composite_key_is_unique() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-groups-unique");

    let _ = create_group(&mut stdin, &mut reader, "Math", "3", "A");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "dup",
        "groups.create",
        json!({ "subject": "Math", "gradeLevel": "3", "groupLetter": "A" }),
    );
    assert_eq!(code, "conflict");

    // Same subject and grade under another letter is a different group.
    let other = create_group(&mut stdin, &mut reader, "Math", "3", "B");
    assert!(!other.is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn group_update_builds_new_display_key_and_rejects_collisions() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-groups-update");

    let _ = create_group(&mut stdin, &mut reader, "Math", "3", "A");
    let group_b = create_group(&mut stdin, &mut reader, "Math", "3", "B");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "upd",
        "groups.update",
        json!({
            "groupId": group_b,
            "patch": { "subject": "Science", "color": "#4caf50" }
        }),
    );
    assert_eq!(
        updated.get("displayKey").and_then(|v| v.as_str()),
        Some("Science-3-B")
    );

    // Renaming onto an existing triple must fail.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "col",
        "groups.update",
        json!({
            "groupId": group_b,
            "patch": { "subject": "Math", "groupLetter": "A" }
        }),
    );
    assert_eq!(code, "conflict");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn group_delete_removes_dependents() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-groups-delete");

    let group_id = create_group(&mut stdin, &mut reader, "History", "2", "C");
    let student_id = test_support::create_student(&mut stdin, &mut reader, &group_id, "Ruiz Mar");
    let activity_id = test_support::create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Essay",
        "2026-03-01",
        "numeric_decimal",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": activity_id,
            "studentId": student_id,
            "value": "7.5"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "attendance.setStatus",
        json!({
            "groupId": group_id,
            "date": "2026-03-01",
            "studentId": student_id,
            "status": "A"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "groups.delete",
        json!({ "groupId": group_id }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "lst", "groups.list", json!({}));
    assert_eq!(
        listed
            .get("groups")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "gone",
        "students.list",
        json!({ "groupId": group_id }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
