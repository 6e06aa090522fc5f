//! Plain-text rendering of manifest rows.

use crate::manifest::{FolderSkip, ManifestRow};

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Base-1024 size with the unit floored to a whole number: 1024 -> "1KB".
pub fn format_size(bytes: u64) -> String {
    let mut unit = 0usize;
    let mut scaled = bytes;
    while scaled >= 1024 && unit + 1 < UNITS.len() {
        scaled /= 1024;
        unit += 1;
    }
    format!("{}{}", scaled, UNITS[unit])
}

const HEADERS: [&str; 7] = ["ID", "Name", "Parents", "Size", "Type", "Modified Time", "Status"];

/// Render rows as an aligned table with a dashed rule under the header.
pub fn render(rows: &[ManifestRow]) -> String {
    let cells: Vec<[String; 7]> = rows
        .iter()
        .map(|r| {
            [
                r.id.clone(),
                r.name.clone(),
                r.parents_display(),
                r.size_bytes.map(format_size).unwrap_or_else(|| "N/A".to_string()),
                r.kind.clone(),
                r.modified_at.to_rfc3339(),
                r.status.label().to_string(),
            ]
        })
        .collect();
    let headers = HEADERS.map(String::from);
    table(&headers, &cells)
}

/// Render folders whose listing was cut short.
pub fn render_skips(skips: &[FolderSkip]) -> String {
    let cells: Vec<[String; 4]> = skips
        .iter()
        .map(|s| [s.id.clone(), s.remote_path.clone(), s.pages_listed.to_string(), s.error.clone()])
        .collect();
    let headers = ["ID", "Folder", "Pages", "Error"].map(String::from);
    table(&headers, &cells)
}

fn table<const N: usize>(headers: &[String; N], cells: &[[String; N]]) -> String {
    let mut widths: [usize; N] = std::array::from_fn(|i| headers[i].chars().count());
    for row in cells {
        for (w, c) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(c.chars().count());
        }
    }
    let mut out = String::new();
    push_line(&mut out, headers, &widths);
    let rule = widths.map(|w| "-".repeat(w));
    push_line(&mut out, &rule, &widths);
    for row in cells {
        push_line(&mut out, row, &widths);
    }
    out
}

fn push_line<const N: usize>(out: &mut String, cols: &[String; N], widths: &[usize; N]) {
    let mut line = String::new();
    for (i, (c, w)) in cols.iter().zip(widths.iter()).enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        line.push_str(c);
        let pad = w.saturating_sub(c.chars().count());
        line.extend(std::iter::repeat(' ').take(pad));
    }
    out.push_str(line.trim_end());
    out.push('\n');
}
