mod test_support;

use serde_json::json;
use test_support::{
    create_activity, create_group, create_student, open_workspace, request_err, request_ok,
    spawn_sidecar,
};

#[test]
fn activity_dates_and_grading_types_are_validated() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-activities-validate");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "2", "A");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-date",
        "activities.create",
        json!({
            "groupId": group_id,
            "name": "Exam",
            "date": "10/02/2026",
            "gradingType": "numeric_decimal"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-type",
        "activities.create",
        json!({
            "groupId": group_id,
            "name": "Exam",
            "date": "2026-02-10",
            "gradingType": "stars"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "missing-custom",
        "activities.create",
        json!({
            "groupId": group_id,
            "name": "Exam",
            "date": "2026-02-10",
            "gradingType": "custom:does-not-exist"
        }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn changing_grading_type_clears_recorded_grades() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-activities-retype");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "2", "B");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Nadal Jan");
    let activity = create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Exam 1",
        "2026-02-10",
        "numeric_decimal",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "studentId": student,
            "value": "8.25",
            "observation": "strong start"
        }),
    );

    // Editing without touching the grading type keeps the entries.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "rename",
        "activities.update",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "patch": { "name": "Exam 1 (retake)" }
        }),
    );
    assert_eq!(
        updated.get("gradingTypeChanged").and_then(|v| v.as_bool()),
        Some(false)
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open1",
        "grades.activityOpen",
        json!({ "groupId": group_id, "activityId": activity }),
    );
    let entry = opened["rows"][0]["entry"].clone();
    assert_eq!(entry.get("value").and_then(|v| v.as_str()), Some("8.25"));

    // Switching the grading type drops them.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "retype",
        "activities.update",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "patch": { "gradingType": "pass_fail" }
        }),
    );
    assert_eq!(
        updated.get("gradingTypeChanged").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(updated.get("clearedGrades").and_then(|v| v.as_i64()), Some(1));

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open2",
        "grades.activityOpen",
        json!({ "groupId": group_id, "activityId": activity }),
    );
    assert!(opened["rows"][0]["entry"].is_null());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_removes_activity_and_its_grades() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-activities-delete");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "2", "C");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Rey Ona");
    let activity = create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Homework",
        "2026-02-12",
        "numeric_integer",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "studentId": student,
            "value": "6"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "activities.delete",
        json!({ "groupId": group_id, "activityId": activity }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "lst",
        "activities.list",
        json!({ "groupId": group_id }),
    );
    assert_eq!(
        listed
            .get("activities")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "open",
        "grades.activityOpen",
        json!({ "groupId": group_id, "activityId": activity }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
