use std::fmt::Write;

use tally_import::BatchNavigator;
use tally_platform::{ImportPreviewResponse, ImportResult, RowValidationError, ValidationSummary};

/// Row errors shown per report before the rest are elided.
const MAX_REPORTED_ROWS: usize = 20;

pub fn summary_line(summary: &ValidationSummary) -> String {
    format!(
        "{} rows: {} valid, {} with errors ({} errors, {} warnings)",
        summary.total_rows,
        summary.valid_rows,
        summary.error_rows,
        summary.error_count,
        summary.warning_count
    )
}

fn error_line(error: &RowValidationError) -> String {
    let mut line = match error.field_name.as_deref() {
        Some(field) => format!("{field}: {}", error.message),
        None => error.message.clone(),
    };
    if let Some(value) = &error.current_value {
        let _ = write!(line, " (got {value})");
    }
    line
}

pub fn preview_report(preview: &ImportPreviewResponse) -> String {
    let mut out = String::new();
    if let Some(info) = &preview.batch_info {
        let _ = writeln!(out, "{}", BatchNavigator::describe(info));
    }
    let _ = writeln!(out, "{}", summary_line(&preview.validation_summary));

    let grouped = preview.errors_by_row();
    for (row, errors) in grouped.iter().take(MAX_REPORTED_ROWS) {
        for error in errors {
            let _ = writeln!(out, "  row {row}: {}", error_line(error));
        }
    }
    if grouped.len() > MAX_REPORTED_ROWS {
        let _ = writeln!(
            out,
            "  ... {} more rows with errors",
            grouped.len() - MAX_REPORTED_ROWS
        );
    }
    if !preview.can_proceed {
        let _ = writeln!(out, "import blocked by validation errors");
    }
    out
}

pub fn result_report(result: &ImportResult) -> String {
    let mut out = format!(
        "{} import {}: {} of {} rows imported, {} errors, {} skipped\n",
        result.model,
        result.status.as_str(),
        result.successful_rows,
        result.total_rows,
        result.error_rows,
        result.skipped_rows
    );
    for error in result.errors.iter().take(MAX_REPORTED_ROWS) {
        let row = error
            .row_number
            .map(|row| format!("row {row}"))
            .unwrap_or_else(|| "file".to_string());
        let _ = writeln!(out, "  {row}: {}", error_line(error));
    }
    if result.errors.len() > MAX_REPORTED_ROWS {
        let _ = writeln!(
            out,
            "  ... {} more errors",
            result.errors.len() - MAX_REPORTED_ROWS
        );
    }
    out
}
