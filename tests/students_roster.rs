mod test_support;

use serde_json::json;
use test_support::{
    create_group, create_student, open_workspace, request_err, request_ok, spawn_sidecar,
};

#[test]
fn roster_keeps_insert_order_and_details() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-roster");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "1", "A");
    let first = create_student(&mut stdin, &mut reader, &group_id, "Serrano Gil Paula");
    let second = create_student(&mut stdin, &mut reader, &group_id, "Ortega Ivan");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "upd",
        "students.update",
        json!({
            "groupId": group_id,
            "studentId": first,
            "patch": {
                "observations": "needs front row seat",
                "classifications": "support-plan"
            }
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "lst",
        "students.list",
        json!({ "groupId": group_id }),
    );
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("students array");
    assert_eq!(students.len(), 2);
    assert_eq!(
        students[0].get("name").and_then(|v| v.as_str()),
        Some("Serrano Gil Paula")
    );
    assert_eq!(
        students[0].get("observations").and_then(|v| v.as_str()),
        Some("needs front row seat")
    );
    assert_eq!(
        students[0].get("classifications").and_then(|v| v.as_str()),
        Some("support-plan")
    );
    assert!(students[0]
        .get("updatedAt")
        .and_then(|v| v.as_str())
        .is_some());
    assert_eq!(students[1].get("id").and_then(|v| v.as_str()), Some(second.as_str()));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reorder_requires_full_permutation() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-roster-reorder");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "1", "B");
    let a = create_student(&mut stdin, &mut reader, &group_id, "Alonso Eva");
    let b = create_student(&mut stdin, &mut reader, &group_id, "Bravo Hugo");
    let c = create_student(&mut stdin, &mut reader, &group_id, "Costa Noa");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad",
        "students.reorder",
        json!({ "groupId": group_id, "studentIds": [c, a] }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ok",
        "students.reorder",
        json!({ "groupId": group_id, "studentIds": [c.clone(), a.clone(), b.clone()] }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "lst",
        "students.list",
        json!({ "groupId": group_id }),
    );
    let order: Vec<String> = listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students array")
        .iter()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()).map(|v| v.to_string()))
        .collect();
    assert_eq!(order, vec![c, a, b]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_clears_grades_and_attendance_rows() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-roster-delete");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "1", "C");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Prado Lia");
    let activity = test_support::create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Quiz",
        "2026-04-10",
        "numeric_decimal",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "studentId": student,
            "value": "9"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a",
        "attendance.setStatus",
        json!({
            "groupId": group_id,
            "date": "2026-04-10",
            "studentId": student,
            "status": "P"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "students.delete",
        json!({ "groupId": group_id, "studentId": student }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "grades.activityOpen",
        json!({ "groupId": group_id, "activityId": activity }),
    );
    assert_eq!(
        opened.get("rows").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
