mod test_support;

use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, spawn_sidecar};

#[test]
fn defaults_are_returned_before_any_update() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-setup-defaults");

    let setup = request_ok(&mut stdin, &mut reader, "get", "setup.get", json!({}));
    assert_eq!(setup["agenda"]["weekStartsMonday"].as_bool(), Some(true));
    assert_eq!(
        setup["grading"]["defaultGradingType"].as_str(),
        Some("numeric_decimal")
    );
    assert_eq!(setup["grading"]["npLabel"].as_str(), Some("NP"));
    assert_eq!(
        setup["reports"]["filenamePrefix"].as_str(),
        Some("gradebook")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn patches_validate_fields_and_persist() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "gradebook-setup-patch");

    // Unknown fields and out-of-domain values are rejected.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad1",
        "setup.update",
        json!({ "section": "agenda", "patch": { "startOnSunday": true } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad2",
        "setup.update",
        json!({ "section": "agenda", "patch": { "defaultTaskHorizonDays": 365 } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad3",
        "setup.update",
        json!({ "section": "grading", "patch": { "defaultGradingType": "custom:xyz" } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad4",
        "setup.update",
        json!({ "section": "timetable", "patch": {} }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ok",
        "setup.update",
        json!({
            "section": "grading",
            "patch": { "defaultGradingType": "pass_fail", "npLabel": "ABS" }
        }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "get", "setup.get", json!({}));
    assert_eq!(
        setup["grading"]["defaultGradingType"].as_str(),
        Some("pass_fail")
    );
    assert_eq!(setup["grading"]["npLabel"].as_str(), Some("ABS"));
    // Untouched fields keep their defaults.
    assert_eq!(
        setup["grading"]["showObservationsInReports"].as_bool(),
        Some(true)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
