//! Rendering of query results.
//!
//! Writes a [`QueryResult`] as an aligned text table, CSV with a header row,
//! or a JSON array of row objects. The text form is also what the verifier
//! prompt embeds as the full result contents.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::Writer;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{Cell, OutputFormat, QueryResult};

/// Write a result to any writer in the given format
pub fn write_result<W: Write>(result: &QueryResult, format: OutputFormat, writer: &mut W) -> Result<()> {
    match format {
        OutputFormat::Txt => write_txt(result, writer),
        OutputFormat::Csv => write_csv(result, writer),
        OutputFormat::Json => write_json(result, writer),
    }
}

/// Render a result into a string
pub fn render_to_string(result: &QueryResult, format: OutputFormat) -> Result<String> {
    let mut buffer = Vec::new();
    write_result(result, format, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Write a result to a file, creating parent directories as needed
pub fn write_result_to_file(result: &QueryResult, format: OutputFormat, file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(file_path)?);
    write_result(result, format, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Aligned plain-text table with a row-count footer
fn write_txt<W: Write>(result: &QueryResult, writer: &mut W) -> Result<()> {
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(widths.iter().copied())
            .map(|(value, width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    writeln!(writer, "{}", line(&result.columns))?;
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(writer, "{}", separator.join("-+-"))?;
    for row in &cells {
        writeln!(writer, "{}", line(row))?;
    }
    writeln!(writer, "({} rows)", result.row_count())?;
    Ok(())
}

/// CSV with a header row
fn write_csv<W: Write>(result: &QueryResult, writer: &mut W) -> Result<()> {
    let mut csv_writer = Writer::from_writer(writer);
    csv_writer.write_record(&result.columns)?;
    for row in &result.rows {
        csv_writer.write_record(row.iter().map(|cell| match cell {
            Cell::Null => String::new(),
            other => other.to_string(),
        }))?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// JSON array of `{column: value}` objects
fn write_json<W: Write>(result: &QueryResult, writer: &mut W) -> Result<()> {
    let mut rows = Vec::with_capacity(result.row_count());
    for row in &result.rows {
        let mut object = Map::new();
        for (column, cell) in result.columns.iter().zip(row) {
            object.insert(column.clone(), serde_json::to_value(cell)?);
        }
        rows.push(Value::Object(object));
    }

    serde_json::to_writer_pretty(&mut *writer, &rows)?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryResult {
        QueryResult {
            columns: vec!["region".to_string(), "total_sales".to_string()],
            rows: vec![
                vec![Cell::Text("North".to_string()), Cell::Real(1250.5)],
                vec![Cell::Text("South".to_string()), Cell::Null],
            ],
        }
    }

    #[test]
    fn test_txt_table_alignment() {
        let text = render_to_string(&sample(), OutputFormat::Txt).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "region | total_sales");
        assert_eq!(lines[2], "North  | 1250.5");
        assert_eq!(lines.last(), Some(&"(2 rows)"));
    }

    #[test]
    fn test_csv_nulls_are_empty() {
        let text = render_to_string(&sample(), OutputFormat::Csv).unwrap();
        assert_eq!(text, "region,total_sales\nNorth,1250.5\nSouth,\n");
    }

    #[test]
    fn test_json_rows_are_objects() {
        let text = render_to_string(&sample(), OutputFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["region"], "North");
        assert!(value[1]["total_sales"].is_null());
    }
}
