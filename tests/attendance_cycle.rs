mod test_support;

use serde_json::json;
use test_support::{
    create_group, create_student, open_workspace, request_err, request_ok, spawn_sidecar,
};

#[test]
fn cycle_visits_six_statuses_and_wraps() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-attendance-cycle");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "5", "A");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Soler Max");

    // Unrecorded counts as N, so six clicks walk P, A, R, E, I and back to N.
    let mut seen = Vec::new();
    for i in 0..6 {
        let cycled = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "attendance.cycleStatus",
            json!({
                "groupId": group_id,
                "date": "2026-09-14",
                "studentId": student
            }),
        );
        seen.push(
            cycled
                .get("status")
                .and_then(|v| v.as_str())
                .expect("status")
                .to_string(),
        );
    }
    assert_eq!(seen, vec!["P", "A", "R", "E", "I", "N"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn set_status_validates_code_and_keeps_justified_flag() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-attendance-set");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "5", "B");
    let student = create_student(&mut stdin, &mut reader, &group_id, "Pardo Vera");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad",
        "attendance.setStatus",
        json!({
            "groupId": group_id,
            "date": "2026-09-15",
            "studentId": student,
            "status": "X"
        }),
    );
    assert_eq!(code, "bad_params");

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "abs",
        "attendance.setStatus",
        json!({
            "groupId": group_id,
            "date": "2026-09-15",
            "studentId": student,
            "status": "a",
            "justified": true
        }),
    );
    assert_eq!(set.get("status").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(set.get("justified").and_then(|v| v.as_bool()), Some(true));

    // Cycling keeps the justified flag on the record.
    let cycled = request_ok(
        &mut stdin,
        &mut reader,
        "cyc",
        "attendance.cycleStatus",
        json!({
            "groupId": group_id,
            "date": "2026-09-15",
            "studentId": student
        }),
    );
    assert_eq!(cycled.get("status").and_then(|v| v.as_str()), Some("R"));

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "day",
        "attendance.dayOpen",
        json!({ "groupId": group_id, "date": "2026-09-15" }),
    );
    let row = day["rows"][0].clone();
    assert_eq!(row["status"].as_str(), Some("R"));
    assert_eq!(row["justified"].as_bool(), Some(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulk_stamp_skips_non_members_and_summary_counts_by_range() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-attendance-bulk");

    let group_id = create_group(&mut stdin, &mut reader, "Math", "5", "C");
    let a = create_student(&mut stdin, &mut reader, &group_id, "Roca Jon");
    let b = create_student(&mut stdin, &mut reader, &group_id, "Sanz Mia");

    let stamped = request_ok(
        &mut stdin,
        &mut reader,
        "stamp",
        "attendance.bulkStamp",
        json!({
            "groupId": group_id,
            "date": "2026-09-16",
            "status": "P",
            "studentIds": [a, b, "stranger"]
        }),
    );
    assert_eq!(stamped.get("stamped").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(stamped.get("skipped").and_then(|v| v.as_i64()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "abs",
        "attendance.setStatus",
        json!({
            "groupId": group_id,
            "date": "2026-09-17",
            "studentId": a,
            "status": "A",
            "justified": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "late",
        "attendance.setStatus",
        json!({
            "groupId": group_id,
            "date": "2026-10-01",
            "studentId": a,
            "status": "R"
        }),
    );

    // Range excludes the October record.
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "sum",
        "attendance.summary",
        json!({
            "groupId": group_id,
            "from": "2026-09-01",
            "to": "2026-09-30"
        }),
    );
    let rows = summary.get("rows").and_then(|v| v.as_array()).expect("rows");
    let row_a = rows
        .iter()
        .find(|r| r["studentId"].as_str() == Some(a.as_str()))
        .expect("row for first student");
    assert_eq!(row_a["counts"]["P"].as_i64(), Some(1));
    assert_eq!(row_a["counts"]["A"].as_i64(), Some(1));
    assert_eq!(row_a["counts"]["R"].as_i64(), Some(0));
    assert_eq!(row_a["justified"].as_i64(), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
