//! Human-readable rendering of analysis results and import reports

use ferry_import::{GenericAnalysisResult, ImportReport, SkippedIndex};
use std::fmt::Write as _;

fn skipped_lines(out: &mut String, skipped: &[SkippedIndex]) {
    if skipped.is_empty() {
        return;
    }
    let _ = writeln!(out, "  Skipped indexes:");
    for index in skipped {
        let _ = writeln!(out, "    {}.{} ({})", index.table, index.index, index.reason);
    }
}

fn warning_lines(out: &mut String, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    let _ = writeln!(out, "  Warnings:");
    for warning in warnings {
        let _ = writeln!(out, "    {}", warning);
    }
}

pub fn analysis_text(analysis: &GenericAnalysisResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Source: {}", analysis.source_path.display());
    let _ = writeln!(out, "  Format: {}", analysis.format.display_name());
    let _ = writeln!(
        out,
        "  Tables: {} ({} rows)",
        analysis.table_names.len(),
        analysis.total_rows()
    );
    for table in &analysis.table_names {
        let rows = analysis.row_counts.get(table).copied().unwrap_or(0);
        let _ = writeln!(out, "    {:<32} {:>12}", table, rows);
    }
    skipped_lines(&mut out, &analysis.skipped_indexes);
    warning_lines(&mut out, &analysis.warnings);
    out
}

pub fn report_text(report: &ImportReport, heading: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heading);
    let _ = writeln!(out, "  Source: {}", report.source_path.display());
    let _ = writeln!(out, "  Destination: {}", report.destination_path.display());
    if let Some(format) = report.format {
        let _ = writeln!(out, "  Format: {}", format.display_name());
    }
    let _ = writeln!(out, "  Duration: {:.2}s", report.elapsed.as_secs_f64());
    let _ = writeln!(out, "  Tables: {}", report.tables.len());
    for table in &report.tables {
        let dest = report
            .table_mappings
            .get(table)
            .map(String::as_str)
            .unwrap_or(table.as_str());
        let rows = report.rows_copied.get(table).copied().unwrap_or(0);
        if dest == table.as_str() {
            let _ = writeln!(out, "    {:<32} {:>12}", table, rows);
        } else {
            let _ = writeln!(out, "    {:<32} {:>12}", format!("{} -> {}", table, dest), rows);
        }
    }
    let _ = writeln!(out, "  Rows: {}", report.total_rows());
    let _ = writeln!(out, "  Indexes: {}", report.indexes_created.len());
    if !report.unique_columns_added.is_empty() {
        let _ = writeln!(
            out,
            "  Unique columns: {}",
            report.unique_columns_added.join(", ")
        );
    }
    skipped_lines(&mut out, &report.skipped_indexes);
    warning_lines(&mut out, &report.warnings);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_import::SourceFormat;
    use pretty_assertions::assert_eq;

    #[test]
    fn report_lists_renamed_tables_and_skips() {
        let mut report = ImportReport {
            format: Some(SourceFormat::MySqlDump),
            tables: vec!["Users".into()],
            ..Default::default()
        };
        report.table_mappings.insert("Users".into(), "users".into());
        report.rows_copied.insert("Users".into(), 12);
        report.skipped_indexes.push(SkippedIndex {
            index: "users_name_email".into(),
            table: "Users".into(),
            reason: "composite".into(),
        });

        let text = report_text(&report, "Import complete");
        assert!(text.starts_with("Import complete\n"));
        assert!(text.contains("Users -> users"));
        assert!(text.contains("  Rows: 12\n"));
        assert!(text.contains("    Users.users_name_email (composite)\n"));
        assert!(!text.contains("Warnings"));
    }

    #[test]
    fn analysis_lists_every_table_with_counts() {
        let mut analysis = GenericAnalysisResult {
            source_path: "shop.sql".into(),
            format: SourceFormat::PostgresDump,
            table_names: vec!["users".into(), "posts".into()],
            row_counts: Default::default(),
            skipped_indexes: vec![],
            warnings: vec!["Skipped composite foreign key".into()],
        };
        analysis.row_counts.insert("users".into(), 2);
        analysis.row_counts.insert("posts".into(), 5);

        let text = analysis_text(&analysis);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "  Format: PostgreSQL plain dump");
        assert_eq!(lines[2], "  Tables: 2 (7 rows)");
        assert!(lines[3].starts_with("    users"));
        assert!(lines[4].starts_with("    posts"));
        assert_eq!(lines.last(), Some(&"    Skipped composite foreign key"));
    }
}
