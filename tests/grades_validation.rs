mod test_support;

use serde_json::json;
use test_support::{
    create_activity, create_group, create_student, open_workspace, request_err, request_ok,
    spawn_sidecar,
};

#[test]
fn numeric_decimal_rejects_out_of_range_values() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-grades-range");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "4", "A");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Iglesias Leo");
    let activity = create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Exam",
        "2026-05-05",
        "numeric_decimal",
    );

    for bad in ["10.5", "-1", "eleven"] {
        let code = request_err(
            &mut stdin,
            &mut reader,
            "bad",
            "grades.set",
            json!({
                "groupId": group_id,
                "activityId": activity,
                "studentId": student,
                "value": bad
            }),
        );
        assert_eq!(code, "bad_params", "value {} should be rejected", bad);
    }

    // Boundaries are inclusive.
    for good in ["0", "10", "7.25"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "good",
            "grades.set",
            json!({
                "groupId": group_id,
                "activityId": activity,
                "studentId": student,
                "value": good
            }),
        );
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn integer_type_rejects_fractions_and_letter_scale_canonicalizes() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-grades-kinds");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "4", "B");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Marin Pol");
    let int_activity = create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Quiz",
        "2026-05-06",
        "numeric_integer",
    );
    let letter_activity = create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Project",
        "2026-05-07",
        "letter_scale",
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "frac",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": int_activity,
            "studentId": student,
            "value": "7.5"
        }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "letter",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": letter_activity,
            "studentId": student,
            "value": "b"
        }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "grades.activityOpen",
        json!({ "groupId": group_id, "activityId": letter_activity }),
    );
    assert_eq!(
        opened["rows"][0]["entry"]["value"].as_str(),
        Some("B"),
        "letter grades store the scale's canonical casing"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn np_entries_carry_no_value_and_empty_value_clears() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-grades-np");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "4", "C");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Campos Ada");
    let activity = create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Exam",
        "2026-05-08",
        "numeric_decimal",
    );

    // NP wins over any value sent along with it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "np",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "studentId": student,
            "value": "9",
            "isNP": true,
            "observation": "absent during exam"
        }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open1",
        "grades.activityOpen",
        json!({ "groupId": group_id, "activityId": activity }),
    );
    let entry = opened["rows"][0]["entry"].clone();
    assert_eq!(entry["isNP"].as_bool(), Some(true));
    assert_eq!(entry["value"].as_str(), Some(""));
    assert_eq!(entry["observation"].as_str(), Some("absent during exam"));

    // An empty non-NP value clears the cell entirely.
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "clear",
        "grades.set",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "studentId": student,
            "value": ""
        }),
    );
    assert_eq!(cleared.get("cleared").and_then(|v| v.as_bool()), Some(true));
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
fn bulk_set_applies_valid_edits_and_reports_bad_ones() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-grades-bulk");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "4", "D");
    let a = create_student(&mut stdin, &mut reader, &group_id, "Lara Gael");
    let b = create_student(&mut stdin, &mut reader, &group_id, "Mora Cloe");
    let activity = create_activity(
        &mut stdin,
        &mut reader,
        &group_id,
        "Exam",
        "2026-05-09",
        "numeric_decimal",
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "bulk",
        "grades.bulkSet",
        json!({
            "groupId": group_id,
            "activityId": activity,
            "edits": [
                { "studentId": a, "value": "5.5" },
                { "studentId": b, "value": "42" },
                { "studentId": "ghost", "value": "4" }
            ]
        }),
    );
    assert_eq!(result.get("updated").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(result.get("rejected").and_then(|v| v.as_i64()), Some(2));
    let errors = result.get("errors").and_then(|v| v.as_array()).expect("errors");
    assert_eq!(errors.len(), 2);

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "grades.activityOpen",
        json!({ "groupId": group_id, "activityId": activity }),
    );
    assert_eq!(opened["rows"][0]["entry"]["value"].as_str(), Some("5.5"));
    assert!(opened["rows"][1]["entry"].is_null());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
