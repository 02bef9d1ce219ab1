use std::path::PathBuf;

use thiserror::Error;

pub const USAGE: &str = "\
Usage:
  toolgate check <catalog.yaml>
  toolgate schemas <catalog.yaml>
  toolgate run <catalog.yaml> <calls.yaml> [--user <id>] [--permissions <A,B,...>]
                [--audit <file.jsonl>] [--config <engine.yaml>]

Environment:
  RUST_LOG                 log filter (default: info)
  TOOLGATE_SANDBOX_MODE    overrides sandboxMode
  TOOLGATE_TIMEOUT_MS      overrides defaultTimeout
  TOOLGATE_MAX_CONCURRENT  overrides maxConcurrentExecutions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Check {
        catalog: PathBuf,
    },
    Schemas {
        catalog: PathBuf,
    },
    Run {
        catalog: PathBuf,
        calls: PathBuf,
        user: String,
        permissions: Vec<String>,
        audit_log: Option<PathBuf>,
    },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config: Option<PathBuf>,
    pub command: Command,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Option {0} needs a value")]
    MissingValue(String),
}

/// `args` excludes the program name.
pub fn parse(args: &[String]) -> Result<Invocation, CliError> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut user = None;
    let mut permissions = Vec::new();
    let mut audit_log = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Ok(Invocation {
                    config: None,
                    command: Command::Help,
                })
            }
            "--config" | "--user" | "--permissions" | "--audit" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::MissingValue(arg.clone()))?;
                match arg.as_str() {
                    "--config" => config = Some(PathBuf::from(value)),
                    "--user" => user = Some(value.clone()),
                    "--permissions" => permissions.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(str::to_string),
                    ),
                    _ => audit_log = Some(PathBuf::from(value)),
                }
            }
            other if other.starts_with("--") => {
                return Err(CliError::UnknownOption(other.to_string()))
            }
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("help") => Command::Help,
        Some("check") => Command::Check {
            catalog: positional
                .next()
                .map(PathBuf::from)
                .ok_or(CliError::MissingArgument("catalog"))?,
        },
        Some("schemas") => Command::Schemas {
            catalog: positional
                .next()
                .map(PathBuf::from)
                .ok_or(CliError::MissingArgument("catalog"))?,
        },
        Some("run") => Command::Run {
            catalog: positional
                .next()
                .map(PathBuf::from)
                .ok_or(CliError::MissingArgument("catalog"))?,
            calls: positional
                .next()
                .map(PathBuf::from)
                .ok_or(CliError::MissingArgument("calls"))?,
            user: user.unwrap_or_else(|| "cli".to_string()),
            permissions,
            audit_log,
        },
        Some(other) => return Err(CliError::UnknownCommand(other.to_string())),
    };

    Ok(Invocation { config, command })
}
