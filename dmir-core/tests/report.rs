use chrono::{TimeZone, Utc};
use dmir_core::manifest::{FolderSkip, ManifestRow, RowStatus};
use dmir_core::parse_id;
use dmir_core::report::{format_size, render, render_skips};
use proptest::prelude::*;

#[test]
fn size_units_are_base_1024() {
    assert_eq!(format_size(0), "0B");
    assert_eq!(format_size(1023), "1023B");
    assert_eq!(format_size(1024), "1KB");
    assert_eq!(format_size(1536), "1KB");
    assert_eq!(format_size(2 * 1024 * 1024), "2MB");
    assert_eq!(format_size(5 << 30), "5GB");
    assert_eq!(format_size(u64::MAX), "15EB");
}

fn lower_bound(s: &str) -> u128 {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap();
    let (n, unit) = s.split_at(split);
    let exp = ["B", "KB", "MB", "GB", "TB", "PB", "EB"].iter().position(|u| *u == unit).unwrap();
    n.parse::<u128>().unwrap() << (10 * exp)
}

proptest! {
    #[test]
    fn size_format_is_monotonic(a in any::<u64>(), b in any::<u64>()) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(lower_bound(&format_size(lo)) <= lower_bound(&format_size(hi)));
        prop_assert!(lower_bound(&format_size(lo)) <= lo as u128);
    }

    #[test]
    fn parse_id_takes_last_segment_before_query(
        id in "[A-Za-z0-9_-]{1,40}",
        key in "[a-z]{1,6}",
        val in "[a-z0-9/]{0,12}",
    ) {
        prop_assume!(key != "id");
        let bare = format!("https://drive.google.com/drive/folders/{}", id);
        let got = parse_id(&bare).unwrap();
        prop_assert_eq!(got.as_str(), id.as_str());
        let shared = format!("{}?{}={}", bare, key, val);
        let got = parse_id(&shared).unwrap();
        prop_assert_eq!(got.as_str(), id.as_str());
    }
}

fn row(name: &str, parents: Vec<&str>, size: Option<u64>, status: RowStatus) -> ManifestRow {
    ManifestRow {
        id: format!("id-{}", name),
        name: name.into(),
        remote_path: name.into(),
        parents: parents.into_iter().map(String::from).collect(),
        size_bytes: size,
        kind: "application/pdf".into(),
        modified_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        status,
    }
}

#[test]
fn table_has_header_rule_and_aligned_columns() {
    let rows = vec![
        row("paper.pdf", vec!["P1"], Some(2048), RowStatus::Present),
        row("orphan", vec![], None, RowStatus::Failed { error: "boom".into(), bytes_written: 0 }),
    ];
    let out = render(&rows);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("ID"));
    assert!(lines[1].starts_with("---"));
    assert!(lines[2].contains("2KB") && lines[2].contains("P1") && lines[2].contains("present"));
    assert!(lines[3].contains("N/A") && lines[3].contains("FAILED"));
    let name_col = lines[0].find("Name").unwrap();
    assert!(lines[2][name_col..].starts_with("paper.pdf"), "{}", lines[2]);
    assert!(lines[3][name_col..].starts_with("orphan"), "{}", lines[3]);
    let size_col = lines[0].find("Size").unwrap();
    assert!(lines[2][size_col..].starts_with("2KB"), "{}", lines[2]);
}

#[test]
fn skip_table_lists_folder_and_error() {
    let skips = vec![FolderSkip { id: "S2".into(), remote_path: "two".into(), pages_listed: 0, error: "HTTP 500".into() }];
    let out = render_skips(&skips);
    assert!(out.lines().nth(2).unwrap().contains("two"));
    assert!(out.contains("HTTP 500"));
}

#[test]
fn empty_table_is_just_headers() {
    assert_eq!(render(&[]).lines().count(), 2);
}
