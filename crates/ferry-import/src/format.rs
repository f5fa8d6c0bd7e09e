//! Source format detection
//!
//! Detection never fails: anything unreadable or unrecognized is reported as
//! [`SourceFormat::Unknown`] and the caller decides what to do with it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::dialects::mysql_shell::parse_chunk_name;

/// Number of leading lines inspected when sniffing a SQL dump
const SNIFF_LINES: usize = 30;
/// Longest line considered while sniffing; longer lines are truncated
const SNIFF_LINE_LIMIT: u64 = 64 * 1024;

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Kind of source an import reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Sqlite,
    PostgresDump,
    #[serde(rename = "mysql_dump")]
    MySqlDump,
    #[serde(rename = "mysql_shell_dump")]
    MySqlShellDump,
    Unknown,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Sqlite => "sqlite",
            SourceFormat::PostgresDump => "postgres_dump",
            SourceFormat::MySqlDump => "mysql_dump",
            SourceFormat::MySqlShellDump => "mysql_shell_dump",
            SourceFormat::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceFormat::Sqlite => "SQLite database",
            SourceFormat::PostgresDump => "PostgreSQL plain dump",
            SourceFormat::MySqlDump => "mysqldump",
            SourceFormat::MySqlShellDump => "MySQL Shell dump",
            SourceFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sqlite" | "sqlite3" => Ok(SourceFormat::Sqlite),
            "postgres" | "postgresql" | "postgres_dump" | "pg_dump" => {
                Ok(SourceFormat::PostgresDump)
            }
            "mysql" | "mysqldump" | "mysql_dump" => Ok(SourceFormat::MySqlDump),
            "mysqlsh" | "mysql_shell" | "mysql_shell_dump" => Ok(SourceFormat::MySqlShellDump),
            other => Err(format!("unknown source format '{}'", other)),
        }
    }
}

/// Classify the file or directory at `path`
#[tracing::instrument(fields(path = %path.display()))]
pub fn detect_format(path: &Path) -> SourceFormat {
    let format = if path.is_dir() {
        detect_directory(path)
    } else if path.is_file() {
        detect_file(path)
    } else {
        SourceFormat::Unknown
    };
    tracing::debug!(format = %format, "source format detected");
    format
}

fn detect_file(path: &Path) -> SourceFormat {
    if has_sqlite_header(path) {
        return SourceFormat::Sqlite;
    }
    match sniff_lines(path) {
        Some(lines) => classify_sql(&lines),
        None => SourceFormat::Unknown,
    }
}

fn has_sqlite_header(path: &Path) -> bool {
    let mut header = [0u8; 16];
    match File::open(path).and_then(|mut file| file.read_exact(&mut header)) {
        Ok(()) => &header == SQLITE_HEADER,
        Err(_) => false,
    }
}

/// First lines of a text file, or `None` if it cannot be read as text
fn sniff_lines(path: &Path) -> Option<Vec<String>> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(SNIFF_LINES);
    let mut buf = Vec::new();

    while lines.len() < SNIFF_LINES {
        buf.clear();
        let read = (&mut reader)
            .take(SNIFF_LINE_LIMIT)
            .read_until(b'\n', &mut buf)
            .ok()?;
        if read == 0 {
            break;
        }
        if buf.contains(&0) {
            return None;
        }
        lines.push(String::from_utf8_lossy(&buf).trim_end().to_string());
    }
    Some(lines)
}

fn classify_sql(lines: &[String]) -> SourceFormat {
    // Tool banners first: they are unambiguous.
    for line in lines {
        if line.contains("PostgreSQL database dump") {
            return SourceFormat::PostgresDump;
        }
        if line.contains("MySQL dump") || line.contains("MariaDB dump") {
            return SourceFormat::MySqlDump;
        }
    }

    for line in lines {
        let upper = line.to_ascii_uppercase();
        if (upper.starts_with("COPY ") && upper.contains("FROM STDIN"))
            || upper.starts_with("SET CLIENT_ENCODING")
            || upper.contains("PG_CATALOG.SET_CONFIG")
        {
            return SourceFormat::PostgresDump;
        }
        if line.starts_with("/*!40")
            || upper.contains("ENGINE=")
            || upper.starts_with("CREATE TABLE `")
            || upper.starts_with("LOCK TABLES `")
        {
            return SourceFormat::MySqlDump;
        }
    }
    SourceFormat::Unknown
}

fn directory_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .collect()
}

fn single_sql_file_in(files: &[PathBuf]) -> Option<&PathBuf> {
    let mut sql_files = files.iter().filter(|p| {
        p.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
    });
    match (sql_files.next(), sql_files.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// The dump file to read for a detected source: a directory holding exactly
/// one `.sql` file resolves to that file, anything else is returned as is
pub fn resolve_dump_path(path: &Path, format: SourceFormat) -> PathBuf {
    let is_text_dump = matches!(format, SourceFormat::PostgresDump | SourceFormat::MySqlDump);
    if is_text_dump && path.is_dir() {
        if let Some(file) = single_sql_file_in(&directory_files(path)) {
            return file.clone();
        }
    }
    path.to_path_buf()
}

fn detect_directory(path: &Path) -> SourceFormat {
    if path.join("@.json").is_file() {
        return SourceFormat::MySqlShellDump;
    }

    let files = directory_files(path);
    if let Some(sql_file) = single_sql_file_in(&files) {
        return detect_file(sql_file);
    }

    let has_chunks = files.iter().any(|p| {
        p.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| parse_chunk_name(name).is_some())
    });
    if has_chunks {
        return SourceFormat::MySqlShellDump;
    }
    SourceFormat::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn detects_sqlite_by_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = SQLITE_HEADER.to_vec();
        bytes.extend_from_slice(&[0u8; 84]);
        let path = write(dir.path(), "app.bin", &bytes);
        assert_eq!(detect_format(&path), SourceFormat::Sqlite);
    }

    #[test]
    fn detects_postgres_banner_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let banner = write(
            dir.path(),
            "a.sql",
            b"--\n-- PostgreSQL database dump\n--\nSET statement_timeout = 0;\n",
        );
        assert_eq!(detect_format(&banner), SourceFormat::PostgresDump);

        let copy = write(
            dir.path(),
            "b.sql",
            b"COPY public.users (id, name) FROM stdin;\n1\tada\n\\.\n",
        );
        assert_eq!(detect_format(&copy), SourceFormat::PostgresDump);
    }

    #[test]
    fn detects_mysql_markers() {
        let dir = tempfile::tempdir().unwrap();
        let banner = write(dir.path(), "a.sql", b"-- MySQL dump 10.13  Distrib 8.0.36\n");
        assert_eq!(detect_format(&banner), SourceFormat::MySqlDump);

        let conditional = write(
            dir.path(),
            "b.sql",
            b"/*!40101 SET NAMES utf8mb4 */;\nCREATE TABLE `t` (\n",
        );
        assert_eq!(detect_format(&conditional), SourceFormat::MySqlDump);

        let maria = write(dir.path(), "c.sql", b"-- MariaDB dump 10.19\n");
        assert_eq!(detect_format(&maria), SourceFormat::MySqlDump);
    }

    #[test]
    fn binary_and_plain_text_are_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write(dir.path(), "blob.bin", &[0xff, 0x00, 0x13, 0x37, b'\n']);
        assert_eq!(detect_format(&binary), SourceFormat::Unknown);

        let text = write(dir.path(), "notes.txt", b"just some notes\n");
        assert_eq!(detect_format(&text), SourceFormat::Unknown);

        assert_eq!(
            detect_format(&dir.path().join("missing.sql")),
            SourceFormat::Unknown
        );
    }

    #[test]
    fn detects_shell_dump_directories() {
        let marker = tempfile::tempdir().unwrap();
        write(marker.path(), "@.json", b"{}");
        assert_eq!(detect_format(marker.path()), SourceFormat::MySqlShellDump);

        let chunks = tempfile::tempdir().unwrap();
        write(chunks.path(), "shop@orders@0.tsv.zst", b"");
        write(chunks.path(), "shop@orders.json", b"{}");
        assert_eq!(detect_format(chunks.path()), SourceFormat::MySqlShellDump);

        let unchunked = tempfile::tempdir().unwrap();
        write(unchunked.path(), "shop@tags.tsv.gz", b"");
        assert_eq!(detect_format(unchunked.path()), SourceFormat::MySqlShellDump);

        let plain = tempfile::tempdir().unwrap();
        write(plain.path(), "a.sql", b"");
        write(plain.path(), "b.sql", b"");
        assert_eq!(detect_format(plain.path()), SourceFormat::Unknown);
    }

    #[test]
    fn directory_with_single_sql_file_is_classified_by_that_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dump.sql", b"-- PostgreSQL database dump\n");
        write(dir.path(), "README", b"exported yesterday\n");
        assert_eq!(detect_format(dir.path()), SourceFormat::PostgresDump);
    }

    #[test]
    fn parses_format_names() {
        assert_eq!(
            "postgres".parse::<SourceFormat>(),
            Ok(SourceFormat::PostgresDump)
        );
        assert_eq!(
            "mysql-shell".parse::<SourceFormat>(),
            Ok(SourceFormat::MySqlShellDump)
        );
        assert!("oracle".parse::<SourceFormat>().is_err());
    }
}
