//! Markdown transcript export

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::llm::{ContentBlock, Turn, TurnRole};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write transcript {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File name for a transcript saved at `at`
pub fn transcript_file_name(at: DateTime<Local>) -> String {
    format!("Chat_{}.md", at.format("%Y%m%d_%H%M%S"))
}

fn heading(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "User",
        TurnRole::Assistant => "Assistant",
        TurnRole::Tool => "Tool",
    }
}

/// Render the transcript as markdown, one heading per turn in order
pub fn render_markdown(turns: &[Turn]) -> String {
    let mut out = String::from("# Chat Log\n\n");
    for turn in turns {
        let _ = writeln!(out, "## {}\n", heading(turn.role));
        for block in &turn.blocks {
            match block {
                ContentBlock::Text { text } => {
                    let _ = writeln!(out, "{}\n", text);
                }
                ContentBlock::Image { image } => {
                    let _ = writeln!(out, "*[image: {}]*\n", image.media_type);
                }
                ContentBlock::ToolUse { call } => {
                    let args = serde_json::to_string_pretty(&call.arguments)
                        .unwrap_or_else(|_| call.arguments.to_string());
                    let _ = writeln!(out, "**Tool call:** `{}`\n\n```json\n{}\n```\n", call.name, args);
                }
                ContentBlock::ToolResult { result } => {
                    let label = if result.is_error { "Tool error" } else { "Tool result" };
                    let _ = writeln!(out, "**{}:**\n\n```\n{}\n```\n", label, result.payload.text);
                    for image in &result.payload.images {
                        let _ = writeln!(out, "*[image: {}]*\n", image.media_type);
                    }
                }
            }
        }
    }
    out
}

/// Write `turns` to `Chat_YYYYMMDD_HHMMSS.md` under `dir`
///
/// Takes the transcript by reference; the caller's state is never touched.
pub fn export_transcript(turns: &[Turn], dir: &Path) -> Result<PathBuf, ExportError> {
    let path = dir.join(transcript_file_name(Local::now()));
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Write {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, render_markdown(turns)).map_err(|source| ExportError::Write {
        path: path.clone(),
        source,
    })?;
    tracing::info!(path = %path.display(), turns = turns.len(), "Transcript exported");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ToolCall, ToolResult};
    use chrono::TimeZone;

    #[test]
    fn test_file_name_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(transcript_file_name(at), "Chat_20240309_140507.md");
    }

    #[test]
    fn test_headings_follow_turn_order() {
        let turns = vec![
            Turn::user("list files"),
            Turn::assistant_blocks(vec![ContentBlock::ToolUse {
                call: ToolCall {
                    id: "t1".to_string(),
                    name: "run_shell_command".to_string(),
                    arguments: serde_json::json!({"command": "ls"}),
                },
            }]),
            Turn::tool_result(ToolResult::error("t1", "boom")),
            Turn::assistant("sorry"),
        ];
        let md = render_markdown(&turns);
        let user = md.find("## User").unwrap();
        let tool = md.find("## Tool").unwrap();
        let last = md.rfind("## Assistant").unwrap();
        assert!(user < tool && tool < last);
        assert!(md.contains("**Tool error:**"));
        assert!(md.contains("run_shell_command"));
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let turns = vec![Turn::user("hello"), Turn::assistant("hi")];
        let path = export_transcript(&turns, dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("Chat_"));
        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains("hello"));
        assert!(body.contains("## Assistant"));
    }
}
