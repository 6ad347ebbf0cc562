use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs::File;
use std::io::BufWriter;

use chrono::{DateTime, Utc};
use indoc::formatdoc;
use serde::Serialize;

use hprof_delve::dump::HeapDump;
use hprof_delve::errors::HprofDelveError;
use hprof_delve::heap::object::HeapObject;
use hprof_delve::utils::pretty_bytes_size;

#[derive(Serialize, Clone)]
pub struct RetainedStats {
    pub address: String,
    pub class_name: String,
    pub shallow_bytes: u64,
    pub retained_bytes: u64,
}

impl RetainedStats {
    pub fn from_object(object: &HeapObject) -> Self {
        RetainedStats {
            address: format!("0x{:x}", object.address),
            class_name: object.class_name().unwrap_or("(unresolved class)").to_string(),
            shallow_bytes: object.shallow_size,
            retained_bytes: object.retained_size.unwrap_or(0),
        }
    }
}

#[derive(Serialize)]
pub struct JsonResult {
    top_retained_objects: Vec<RetainedStats>,
}

impl JsonResult {
    pub fn new(top_retained_objects: Vec<RetainedStats>) -> JsonResult {
        JsonResult {
            top_retained_objects,
        }
    }

    pub fn save_as_file(&self) -> Result<(), HprofDelveError> {
        let file_path = format!("hprof-delve-{}.json", Utc::now().timestamp_millis());
        let file = File::create(&file_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, &self)?;
        println!("Output JSON result file {file_path}");
        Ok(())
    }
}

pub fn render_summary(dump: &HeapDump, file_len: u64) -> String {
    let header = dump.header();
    let captured = DateTime::<Utc>::from_timestamp_millis(header.timestamp_millis as i64)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    let top = formatdoc!(
        "\nHeap dump summary:

        File size: {}
        Format: {} (identifier size {})
        Captured: {}
        Objects: {}
        Classes: {}
        GC roots: {}",
        pretty_bytes_size(file_len),
        header.format,
        header.id_size,
        captured,
        dump.object_count(),
        dump.class_count(),
        dump.gc_roots().len(),
    );

    // stable per-kind breakdown
    let mut by_kind: BTreeMap<&'static str, u64> = BTreeMap::new();
    for root in dump.gc_roots() {
        *by_kind.entry(root.kind.label()).or_insert(0) += 1;
    }
    let mut result = top;
    for (label, count) in by_kind {
        write!(result, "\n..GC root {label}: {count}").expect("write should not fail");
    }
    result
}

pub fn render_top_retained(rows: &[RetainedStats], top: usize) -> String {
    let mut out = String::new();
    writeln!(out, "\nTop {top} objects by retained size:\n").expect("write should not fail");
    if rows.is_empty() {
        writeln!(out, "(no objects)").expect("write should not fail");
        return out;
    }

    let rendered: Vec<[String; 4]> = rows
        .iter()
        .take(top)
        .map(|row| {
            [
                pretty_bytes_size(row.retained_bytes),
                pretty_bytes_size(row.shallow_bytes),
                row.class_name.clone(),
                row.address.clone(),
            ]
        })
        .collect();

    let headers = ["Retained", "Shallow", "Class name", "Address"];
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rendered {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let render_row = |cells: &[&str]| -> String {
        let mut line = String::new();
        for (cell, width) in cells.iter().zip(widths.iter()) {
            let padding = " ".repeat(width - cell.chars().count());
            // numbers right-aligned, names left-aligned
            if cell.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                write!(line, "| {padding}{cell} ").expect("write should not fail");
            } else {
                write!(line, "| {cell}{padding} ").expect("write should not fail");
            }
        }
        line.push_str("|\n");
        line
    };

    out.push_str(&separator);
    out.push_str(&render_row(&headers));
    out.push_str(&separator);
    for row in &rendered {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&render_row(&cells));
    }
    out.push_str(&separator);
    out
}
