//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use blockrepo_core::{Cid, GcReport, RepoStat, VerifyReport};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Check if JSON mode is enabled.
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write output using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write one streamed event as it happens.
    ///
    /// JSON mode emits one compact object per line. Text mode writes
    /// `text` as-is, or nothing if it is `None`.
    pub fn write_event<T: Serialize>(&self, event: &T, text: Option<String>) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string(event)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                if let Some(text) = text {
                    write!(&self.stdout, "{}", text)?;
                    (&self.stdout).flush()?;
                }
            }
        }
        Ok(())
    }

    /// Write a per-item problem to stderr without failing the command.
    pub fn warn(&self, message: &str) {
        if self.format == OutputFormat::Text {
            let _ = writeln!(io::stderr(), "Error: {}", message);
        }
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error message directly.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

/// Format a byte count as whole MiB.
pub fn mib(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

/// The `RepoSize` line of `stat`. Human mode switches to MiB only once the
/// repo holds at least one whole MiB.
pub fn repo_size_line(bytes: u64, human: bool) -> String {
    if human && mib(bytes) > 0 {
        format!("RepoSize (MiB) \t {}\n", mib(bytes))
    } else {
        format!("RepoSize \t {}\n", bytes)
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub algorithm: String,
}

/// Block stored during `put` or `link`.
#[derive(Debug, Clone, Serialize)]
pub struct StoredBlock {
    pub cid: Cid,
    pub source: String,
}

/// Output for `put` and `link` commands.
#[derive(Debug, Serialize)]
pub struct PutOutput {
    pub success: bool,
    pub result_code: u8,
    pub blocks: Vec<StoredBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<PinInfo>,
}

/// Pin information for `pin ls` and pin creation.
#[derive(Debug, Clone, Serialize)]
pub struct PinInfo {
    pub name: String,
    pub cid: Cid,
}

/// Output for `pin add` command.
#[derive(Debug, Serialize)]
pub struct PinAddOutput {
    pub success: bool,
    pub result_code: u8,
    #[serde(flatten)]
    pub pin: PinInfo,
}

/// Output for `pin ls` command.
#[derive(Debug, Serialize)]
pub struct PinListOutput {
    pub success: bool,
    pub result_code: u8,
    pub pins: Vec<PinInfo>,
}

/// Output for `pin rm` command.
#[derive(Debug, Serialize)]
pub struct PinRmOutput {
    pub success: bool,
    pub result_code: u8,
    pub name: String,
}

/// Output for `gc` command in collect mode.
#[derive(Debug, Serialize)]
pub struct GcOutput {
    pub success: bool,
    pub result_code: u8,
    pub removed_cids: Vec<Cid>,
    #[serde(flatten)]
    pub report: GcReport,
}

/// Output for `verify` command.
#[derive(Debug, Serialize)]
pub struct VerifyOutput {
    pub success: bool,
    pub result_code: u8,
    #[serde(flatten)]
    pub report: VerifyReport,
}

/// Output for `stat` command.
#[derive(Debug, Serialize)]
pub struct StatOutput {
    pub success: bool,
    pub result_code: u8,
    #[serde(flatten)]
    pub stat: RepoStat,
    pub repo_path: String,
    pub version: String,
}

/// Output for `version` command.
#[derive(Debug, Serialize)]
pub struct VersionOutput {
    pub success: bool,
    pub result_code: u8,
    pub version: String,
    pub repo_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockrepo_core::{Codec, StreamStatus};

    #[test]
    fn test_mib_rounds_down() {
        assert_eq!(mib(0), 0);
        assert_eq!(mib(1024 * 1024 - 1), 0);
        assert_eq!(mib(5 * 1024 * 1024 + 7), 5);
    }

    #[test]
    fn test_repo_size_line_small_repo_stays_in_bytes() {
        assert_eq!(repo_size_line(23, true), "RepoSize \t 23\n");
        assert_eq!(repo_size_line(23, false), "RepoSize \t 23\n");
        assert_eq!(
            repo_size_line(3 * 1024 * 1024, true),
            "RepoSize (MiB) \t 3\n"
        );
        assert_eq!(
            repo_size_line(3 * 1024 * 1024, false),
            "RepoSize \t 3145728\n"
        );
    }

    #[test]
    fn test_stat_output_flattens_stat() {
        let output = StatOutput {
            success: true,
            result_code: 0,
            stat: RepoStat {
                num_blocks: 3,
                repo_size: 42,
            },
            repo_path: "/tmp/repo".to_string(),
            version: "fs-repo@1".to_string(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["num_blocks"], 3);
        assert_eq!(json["repo_size"], 42);
        assert_eq!(json["version"], "fs-repo@1");
    }

    #[test]
    fn test_gc_output_flattens_status() {
        let report = GcReport {
            status: StreamStatus::Completed,
            removed: 0,
            bytes_freed: 0,
            retained: 0,
            failed: Vec::new(),
            enumeration_errors: 0,
            dry_run: false,
        };
        let output = GcOutput {
            success: true,
            result_code: 0,
            removed_cids: vec![Cid::compute(Codec::Raw, b"x")],
            report,
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["status"]["status"], "completed");
        assert_eq!(json["removed"], 0);
        assert_eq!(json["removed_cids"].as_array().unwrap().len(), 1);
    }
}
