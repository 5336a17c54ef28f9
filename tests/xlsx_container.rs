#[path = "../src/xlsx.rs"]
mod xlsx;

use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use xlsx::Sheet;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn workbook_container_has_the_expected_parts() {
    let out_dir = temp_dir("gradebook-xlsx-parts");
    let path = out_dir.join("book.xlsx");

    xlsx::write_workbook(
        &path,
        &[
            Sheet {
                name: "Grades".to_string(),
                rows: vec![
                    vec!["Student".to_string(), "Exam".to_string()],
                    vec!["Vega Ana".to_string(), "7.5".to_string()],
                ],
            },
            Sheet {
                name: "Attendance".to_string(),
                rows: vec![vec!["Student".to_string(), "P".to_string()]],
            },
        ],
    )
    .expect("write workbook");

    let f = std::fs::File::open(&path).expect("open workbook");
    let mut archive = zip::ZipArchive::new(f).expect("zip container");
    for entry in [
        "[Content_Types].xml",
        "_rels/.rels",
        "xl/workbook.xml",
        "xl/_rels/workbook.xml.rels",
        "xl/worksheets/sheet1.xml",
        "xl/worksheets/sheet2.xml",
    ] {
        archive
            .by_name(entry)
            .unwrap_or_else(|_| panic!("missing {}", entry));
    }

    let mut sheet1 = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .expect("sheet1")
        .read_to_string(&mut sheet1)
        .expect("read sheet1");
    // Text lands as inline strings, numbers as numeric cells.
    assert!(sheet1.contains("Vega Ana"));
    assert!(sheet1.contains("<c r=\"B2\"><v>7.5</v></c>"));

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn cell_text_is_xml_escaped_and_sheet_names_sanitized() {
    let out_dir = temp_dir("gradebook-xlsx-escape");
    let path = out_dir.join("book.xlsx");

    xlsx::write_workbook(
        &path,
        &[Sheet {
            name: "Notes [draft]/v2".to_string(),
            rows: vec![vec!["a < b & \"c\"".to_string()]],
        }],
    )
    .expect("write workbook");

    let f = std::fs::File::open(&path).expect("open workbook");
    let mut archive = zip::ZipArchive::new(f).expect("zip container");

    let mut workbook = String::new();
    archive
        .by_name("xl/workbook.xml")
        .expect("workbook")
        .read_to_string(&mut workbook)
        .expect("read workbook");
    assert!(workbook.contains("name=\"Notes draftv2\""));

    let mut sheet1 = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .expect("sheet1")
        .read_to_string(&mut sheet1)
        .expect("read sheet1");
    assert!(sheet1.contains("a &lt; b &amp; &quot;c&quot;"));

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn empty_workbook_is_rejected() {
    let out_dir = temp_dir("gradebook-xlsx-empty");
    let path = out_dir.join("book.xlsx");
    assert!(xlsx::write_workbook(&path, &[]).is_err());
    let _ = std::fs::remove_dir_all(out_dir);
}
