//! Shell command sanitizing and whitelisting
//!
//! ```text
//! raw ──sanitize()──► "rm -rf / ls" ──validate()──► first token "rm"
//!                                                        │
//!                               not in whitelist ◄───────┘
//!                                     │
//!                                     ▼
//!                           CommandNotAllowed (never spawned)
//! ```
//!
//! Stripping separators is defense-in-depth only. The real boundary is that
//! a parsed command is spawned as program + argv, never through a shell.

/// Characters removed from every command before validation
const STRIPPED: [char; 3] = [';', '&', '|'];

/// A command was rejected by the whitelist
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Command not allowed: {command}")]
pub struct CommandNotAllowed {
    pub command: String,
}

/// Which arguments a whitelisted verb may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgPolicy {
    /// Any arguments
    Any,
    /// Exactly these arguments, in order
    Exact(Vec<String>),
}

/// One whitelist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub verb: String,
    pub args: ArgPolicy,
}

impl CommandDescriptor {
    pub fn any(verb: &str) -> Self {
        Self {
            verb: verb.to_string(),
            args: ArgPolicy::Any,
        }
    }

    pub fn exact(verb: &str, args: &[&str]) -> Self {
        Self {
            verb: verb.to_string(),
            args: ArgPolicy::Exact(args.iter().map(|a| a.to_string()).collect()),
        }
    }

    fn permits(&self, args: &[String]) -> bool {
        match &self.args {
            ArgPolicy::Any => true,
            ArgPolicy::Exact(expected) => expected.as_slice() == args,
        }
    }
}

/// The stock whitelist: `ls`, `dir`, `echo`, `pip list`, `python --version`
pub fn default_whitelist() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor::any("ls"),
        CommandDescriptor::any("dir"),
        CommandDescriptor::any("echo"),
        CommandDescriptor::exact("pip", &["list"]),
        CommandDescriptor::exact("python", &["--version"]),
    ]
}

/// A validated command ready to spawn without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Remove `;`, `&`, `|` and trim surrounding whitespace
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !STRIPPED.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether the first whitespace-delimited token is a whitelisted verb
pub fn validate(sanitized: &str, whitelist: &[CommandDescriptor]) -> bool {
    match sanitized.split_whitespace().next() {
        Some(first) => whitelist.iter().any(|d| d.verb == first),
        None => false,
    }
}

/// Validate the verb and its arguments, producing a spawnable command
pub fn parse(
    sanitized: &str,
    whitelist: &[CommandDescriptor],
) -> Result<ParsedCommand, CommandNotAllowed> {
    let rejected = || CommandNotAllowed {
        command: sanitized.to_string(),
    };

    let mut tokens = sanitized.split_whitespace().map(str::to_string);
    let program = tokens.next().ok_or_else(rejected)?;
    let args: Vec<String> = tokens.collect();

    whitelist
        .iter()
        .filter(|d| d.verb == program)
        .find(|d| d.permits(&args))
        .ok_or_else(rejected)?;

    Ok(ParsedCommand { program, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize("rm -rf /; ls"), "rm -rf / ls");
        assert_eq!(sanitize("  echo a && echo b | cat "), "echo a  echo b  cat");
    }

    #[test]
    fn test_validate_first_token() {
        let wl = default_whitelist();
        assert!(validate("ls -la", &wl));
        assert!(!validate("rm -rf / ls", &wl));
        assert!(!validate("", &wl));
        assert!(!validate("lsblk", &wl));
    }

    #[test]
    fn test_injection_is_rejected() {
        let wl = default_whitelist();
        let sanitized = sanitize("rm -rf /; ls");
        let err = parse(&sanitized, &wl).unwrap_err();
        assert_eq!(err.command, "rm -rf / ls");
    }

    #[test]
    fn test_parse_any_args() {
        let parsed = parse("ls -la", &default_whitelist()).unwrap();
        assert_eq!(parsed.program, "ls");
        assert_eq!(parsed.args, vec!["-la".to_string()]);
        assert_eq!(parsed.to_string(), "ls -la");
    }

    #[test]
    fn test_parse_exact_args() {
        let wl = default_whitelist();
        assert!(parse("pip list", &wl).is_ok());
        assert!(parse("python --version", &wl).is_ok());
        assert!(parse("pip install requests", &wl).is_err());
        assert!(parse("python -c 'import os'", &wl).is_err());
        assert!(parse("pip", &wl).is_err());
    }
}
