//! File and JSON-lines I/O for the CLI
//!
//! - Input: a graph JSON file and a query file (one query per line)
//! - Output: one JSON object per line, UTF-8

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use super::errors::{CliError, CliResult};
use crate::graph::GraphFile;

/// Read a graph file: `{"nodes": [{"labels": [...], "properties": {...}}]}`
pub fn read_graph(path: &Path) -> CliResult<GraphFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        CliError::graph_error(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| CliError::graph_error(format!("Invalid graph JSON: {}", e)))
}

/// Read a query file. Blank lines and lines starting with `//` are skipped.
pub fn read_queries(path: &Path) -> CliResult<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::io_error(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .map(str::to_string)
        .collect())
}

/// Write one value as a JSON line
pub fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Write a success response
pub fn write_response<W: Write>(out: &mut W, data: Value) -> CliResult<()> {
    write_line(
        out,
        &serde_json::json!({
            "status": "ok",
            "data": data
        }),
    )
}

/// Write an error response
pub fn write_error<W: Write>(out: &mut W, code: &str, message: &str) -> CliResult<()> {
    write_line(
        out,
        &serde_json::json!({
            "status": "error",
            "code": code,
            "message": message
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_read_queries_skips_blank_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "// people").unwrap();
        writeln!(file, "MATCH (n:Person) RETURN n").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  MATCH (n) RETURN n.id LIMIT 1  ").unwrap();

        let queries = read_queries(file.path()).unwrap();
        assert_eq!(
            queries,
            vec!["MATCH (n:Person) RETURN n", "MATCH (n) RETURN n.id LIMIT 1"]
        );
    }

    #[test]
    fn test_read_graph_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"nodes\": 3}}").unwrap();
        let err = read_graph(file.path()).unwrap_err();
        assert_eq!(err.code_str(), "AERO_CLI_GRAPH_ERROR");
    }

    #[test]
    fn test_write_error_line() {
        let mut out = Vec::new();
        write_error(&mut out, "AERO_X", "boom").unwrap();
        let line: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(line["status"], "error");
        assert_eq!(line["code"], "AERO_X");
        assert!(out.ends_with(b"\n"));
    }
}
