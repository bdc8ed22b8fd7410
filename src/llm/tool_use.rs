//! Tool registry schemas and system prompts
//!
//! Every tool the model may call is declared here with an explicit JSON
//! Schema. The dispatcher routes on the same names.

use super::types::ToolSchema;

pub const CREATE_FOLDERS: &str = "create_folders";
pub const CREATE_FILES: &str = "create_files";
pub const READ_FILES: &str = "read_files";
pub const RUN_SHELL_COMMAND: &str = "run_shell_command";
pub const STOP_PROCESS: &str = "stop_process";
pub const EXECUTE_CODE: &str = "execute_code";
pub const EDIT_AND_APPLY: &str = "edit_and_apply";
pub const TAVILY_SEARCH: &str = "tavily_search";

/// Every registered tool name
pub const TOOL_NAMES: [&str; 8] = [
    CREATE_FOLDERS,
    CREATE_FILES,
    READ_FILES,
    RUN_SHELL_COMMAND,
    STOP_PROCESS,
    EXECUTE_CODE,
    EDIT_AND_APPLY,
    TAVILY_SEARCH,
];

/// Marker the model emits when an autonomous goal is reached
pub const COMPLETION_SENTINEL: &str = "AUTOMODE_COMPLETE";

/// Synthetic prompt fed back between automode rounds
pub const CONTINUATION_PROMPT: &str = "Continue with the next step. Or STOP by saying 'AUTOMODE_COMPLETE' if you think you've achieved the results established in the original request.";

fn schema(name: &str, description: &str, input_schema: serde_json::Value) -> ToolSchema {
    ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// The full, fixed tool registry
pub fn tool_registry() -> Vec<ToolSchema> {
    vec![
        schema(
            CREATE_FOLDERS,
            "Create new folders at the specified paths, including any missing parent folders. Use this to organize a project structure.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Folder paths to create"
                    }
                },
                "required": ["paths"]
            }),
        ),
        schema(
            CREATE_FILES,
            "Create one or more files with the given content. Existing files are overwritten and missing parent folders are created.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {"type": "string", "description": "File path"},
                                "content": {"type": "string", "description": "Full file content"}
                            },
                            "required": ["path", "content"]
                        }
                    }
                },
                "required": ["files"]
            }),
        ),
        schema(
            READ_FILES,
            "Read the contents of one or more files. Images are returned as downscaled JPEG images; other binary files are returned base64-encoded.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "File paths to read"
                    }
                },
                "required": ["paths"]
            }),
        ),
        schema(
            RUN_SHELL_COMMAND,
            "Run a whitelisted shell command (ls, dir, echo, pip list, python --version). Set background to true to keep the process running and get a process id back.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The command line to run"},
                    "background": {"type": "boolean", "description": "Run in the background (default false)"}
                },
                "required": ["command"]
            }),
        ),
        schema(
            STOP_PROCESS,
            "Stop a background process started with run_shell_command.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "process_id": {"type": "string", "description": "Id returned when the process was started"}
                },
                "required": ["process_id"]
            }),
        ),
        schema(
            EXECUTE_CODE,
            "Execute Python code in an isolated virtual environment with a time limit. Returns stdout, stderr and the return code, or a timeout notice.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "The Python source to execute"}
                },
                "required": ["code"]
            }),
        ),
        schema(
            EDIT_AND_APPLY,
            "Edit an existing file by describing the change. A code-editing model produces SEARCH/REPLACE blocks which are applied to the file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File to edit"},
                    "instructions": {"type": "string", "description": "What to change and why"}
                },
                "required": ["path", "instructions"]
            }),
        ),
        schema(
            TAVILY_SEARCH,
            "Search the web for up-to-date information. Returns an ordered list of titles, URLs and snippets.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query"}
                },
                "required": ["query"]
            }),
        ),
    ]
}

/// Default system prompt for the main and tool-checker roles
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an AI software engineering assistant with access to tools on the user's machine.

You can:
- Create folders and files, and read files (including images)
- Edit files by describing changes with edit_and_apply
- Run whitelisted shell commands
- Execute Python code in an isolated virtual environment with execute_code
- Search the web with tavily_search

Guidelines:
- Use tools to verify results rather than guessing
- If a tool returns an error, read it and correct your next call
- Keep answers focused on the user's request"#;

/// Extra instructions appended to the system prompt in automode
pub const AUTOMODE_SYSTEM_PROMPT: &str = r#"You are in automode. Work autonomously toward the goal stated by the user, one concrete step per reply, using tools as needed.
When the goal has been fully achieved, reply with the exact phrase AUTOMODE_COMPLETE."#;

/// System prompt for the code-editor role
pub const CODE_EDITOR_PROMPT: &str = r#"You are an expert code editor. Given a file and change instructions, reply ONLY with one or more edit blocks in this exact format:

<<<<<<< SEARCH
exact existing lines to replace
=======
replacement lines
>>>>>>> REPLACE

SEARCH text must match the file exactly, including whitespace. Do not add commentary."#;

/// System prompt for the code-execution analysis role
pub const CODE_EXECUTION_PROMPT: &str = r#"You analyze the result of running Python code. In a few sentences, state whether it succeeded, explain any error, and suggest a fix if needed."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names_are_unique() {
        let tools = tool_registry();
        let mut names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());

        let mut registered = TOOL_NAMES.to_vec();
        registered.sort();
        assert_eq!(names, registered);
    }

    #[test]
    fn test_every_schema_declares_required_fields() {
        for tool in tool_registry() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            let required = tool.input_schema["required"].as_array().unwrap();
            assert!(!required.is_empty(), "{} has no required fields", tool.name);
            for field in required {
                let field = field.as_str().unwrap();
                assert!(
                    tool.input_schema["properties"][field].is_object(),
                    "{} requires undeclared field {}",
                    tool.name,
                    field
                );
            }
        }
    }

    #[test]
    fn test_execute_code_tool_definition() {
        let tool = tool_registry()
            .into_iter()
            .find(|t| t.name == EXECUTE_CODE)
            .unwrap();
        assert_eq!(tool.input_schema["properties"]["code"]["type"], "string");
    }

    #[test]
    fn test_prompts_mention_sentinel() {
        assert!(CONTINUATION_PROMPT.contains(COMPLETION_SENTINEL));
        assert!(AUTOMODE_SYSTEM_PROMPT.contains(COMPLETION_SENTINEL));
    }
}
