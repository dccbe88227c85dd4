//! Output formatting for eduscan (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use eduscan_client::{Notice, NoticeLevel, RecognitionResult};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
#[derive(Debug, Clone, Copy)]
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Render a notice from the scanning session as one line
    pub fn notice_line(&self, notice: &Notice) -> String {
        match notice.level {
            NoticeLevel::Info => notice.message.dimmed().to_string(),
            NoticeLevel::Success => notice.message.green().to_string(),
            NoticeLevel::Warning => notice.message.yellow().to_string(),
            NoticeLevel::Error => notice.message.red().to_string(),
        }
    }

    /// Print data in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data),
        }
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: std::collections::BTreeMap<&str, &str> =
                    pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
                println!("{}", keys.join(","));
                let values: Vec<String> = pairs.iter().map(|(_, v)| escape_csv(v)).collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Print data as CSV
fn print_csv<T: Serialize>(data: &[T]) {
    for line in csv_lines(data) {
        println!("{}", line);
    }
}

fn csv_lines<T: Serialize>(data: &[T]) -> Vec<String> {
    let Some(first) = data.first() else {
        return Vec::new();
    };

    let serde_json::Value::Object(map) = serde_json::to_value(first).unwrap_or_default() else {
        return Vec::new();
    };
    let headers: Vec<String> = map.keys().cloned().collect();

    let mut lines = vec![headers.join(",")];
    for item in data {
        if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
            let values: Vec<String> = headers
                .iter()
                .map(|h| {
                    row.get(h)
                        .map(|v| match v {
                            serde_json::Value::String(s) => escape_csv(s),
                            serde_json::Value::Null => String::new(),
                            other => escape_csv(&other.to_string()),
                        })
                        .unwrap_or_default()
                })
                .collect();
            lines.push(values.join(","));
        }
    }
    lines
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// =============================================================================
// Display types
// =============================================================================

/// One scanned sheet
#[derive(Debug, Tabled, Serialize)]
pub struct ResultRow {
    #[tabled(rename = "Frame")]
    pub frame: u64,
    #[tabled(rename = "File")]
    pub file: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Student")]
    pub student: String,
    #[tabled(rename = "Score")]
    pub score: String,
    #[tabled(rename = "Answered")]
    pub answered: usize,
    #[tabled(rename = "Saved")]
    pub saved: String,
    #[tabled(rename = "Message")]
    pub message: String,
}

impl ResultRow {
    pub fn recognised(frame: u64, file: &str, result: &RecognitionResult) -> Self {
        Self {
            frame,
            file: file.to_string(),
            status: if result.success {
                "recognised".into()
            } else {
                "unrecognised".into()
            },
            student: result
                .student_name
                .clone()
                .or_else(|| result.student_id.clone())
                .unwrap_or_else(|| "-".into()),
            score: result.score_display().unwrap_or_else(|| "-".into()),
            answered: result.answered(),
            saved: "-".into(),
            message: result.message.clone().unwrap_or_default(),
        }
    }

    pub fn failed(frame: u64, file: &str, message: impl Into<String>) -> Self {
        Self {
            frame,
            file: file.to_string(),
            status: "error".into(),
            student: "-".into(),
            score: "-".into(),
            answered: 0,
            saved: "-".into(),
            message: message.into(),
        }
    }
}
