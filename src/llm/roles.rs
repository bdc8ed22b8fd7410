//! Logical model roles
//!
//! Every model call is attributed to exactly one role. Roles pick the model
//! id to use and the token counters that the call's usage is charged to.

use serde::Serialize;

/// Logical role of a model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// First call of every human (or automode) turn
    Main,
    /// Follow-up calls that read tool results
    ToolChecker,
    /// Calls made by the `edit_and_apply` tool
    CodeEditor,
    /// Calls that analyze code-execution output
    CodeExecution,
}

impl ModelRole {
    pub const ALL: [ModelRole; 4] = [
        ModelRole::Main,
        ModelRole::ToolChecker,
        ModelRole::CodeEditor,
        ModelRole::CodeExecution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Main => "main",
            ModelRole::ToolChecker => "tool_checker",
            ModelRole::CodeEditor => "code_editor",
            ModelRole::CodeExecution => "code_execution",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default model id used for every role
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";

/// Model id per role
#[derive(Debug, Clone, PartialEq)]
pub struct RoleModels {
    pub main: String,
    pub tool_checker: String,
    pub code_editor: String,
    pub code_execution: String,
}

impl RoleModels {
    /// Use the same model for every role
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            main: model.clone(),
            tool_checker: model.clone(),
            code_editor: model.clone(),
            code_execution: model,
        }
    }

    pub fn for_role(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Main => &self.main,
            ModelRole::ToolChecker => &self.tool_checker,
            ModelRole::CodeEditor => &self.code_editor,
            ModelRole::CodeExecution => &self.code_execution,
        }
    }
}

impl Default for RoleModels {
    fn default() -> Self {
        Self::uniform(DEFAULT_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_models_lookup() {
        let mut models = RoleModels::uniform("m");
        models.code_editor = "editor".to_string();
        assert_eq!(models.for_role(ModelRole::Main), "m");
        assert_eq!(models.for_role(ModelRole::CodeEditor), "editor");
    }

    #[test]
    fn test_role_names() {
        let names: Vec<_> = ModelRole::ALL.iter().map(|r| r.as_str()).collect();
        assert_eq!(names, ["main", "tool_checker", "code_editor", "code_execution"]);
    }
}
