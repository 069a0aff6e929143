//! Process tools: dependency installs and shell commands
//!
//! Commands run with the project root as working directory, a cleared
//! environment (only `PATH`, plus `HOME` and `TMPDIR` pointed at the project
//! root) and closed stdin. They are confined to the project root by
//! [`Sandbox`], and on timeout their whole process group is killed.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::{str_field, Tool, ToolContext, ToolResult};
use crate::sandbox::{kill_process_group, Sandbox};

/// Captured output is cut at this many bytes per stream
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Output of a sandboxed child process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: f64,
}

impl ProcessOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    fn to_payload(&self) -> Value {
        json!({
            "exit_code": self.exit_code,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "timed_out": self.timed_out,
        })
    }
}

/// Run a command confined to `cwd`, killing its process group after `timeout`
pub async fn run_sandboxed(
    mut cmd: Command,
    cwd: &Path,
    timeout: Duration,
) -> Result<ProcessOutput, String> {
    let path_env = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());
    let sandbox = Sandbox::for_project(cwd, &path_env).map_err(|e| e.to_string())?;

    cmd.current_dir(cwd)
        .env_clear()
        .env("PATH", path_env)
        .env("HOME", cwd)
        .env("TMPDIR", cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    sandbox.apply(&mut cmd);

    let start = Instant::now();
    let child = cmd
        .spawn()
        .map_err(|e| format!("Failed to start process: {}", e))?;
    drop(sandbox);
    let pgid = child.id();

    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    // Background jobs left behind must not outlive the reported result
    if let Some(pgid) = pgid {
        kill_process_group(pgid);
    }

    match result {
        Ok(Ok(output)) => Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate_output(&output.stdout),
            stderr: truncate_output(&output.stderr),
            timed_out: false,
            duration_ms,
        }),
        Ok(Err(e)) => Err(format!("Process failed: {}", e)),
        Err(_) => Ok(ProcessOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("Timed out after {}s", timeout.as_secs_f64()),
            timed_out: true,
            duration_ms,
        }),
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (output truncated)", &text[..end])
}

/// Turn a finished process into a tool result
fn process_result(output: ProcessOutput, failure_label: &str) -> ToolResult {
    let payload = output.to_payload();
    if output.succeeded() {
        ToolResult::ok(payload)
    } else if output.timed_out {
        ToolResult::failure(format!("{} timed out", failure_label)).with_payload(payload)
    } else {
        ToolResult::failure(format!(
            "{} exited with code {}",
            failure_label, output.exit_code
        ))
        .with_payload(payload)
    }
}

/// `npm install` a list of packages into the project
pub struct InstallDependenciesTool {
    program: String,
}

impl Default for InstallDependenciesTool {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
        }
    }
}

impl InstallDependenciesTool {
    /// Use another executable in place of `npm`
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Arguments passed to npm for one install
fn npm_install_args(packages: &[String], dev: bool) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        "--no-audit".to_string(),
        "--no-fund".to_string(),
    ];
    if dev {
        args.push("--save-dev".to_string());
    }
    args.extend(packages.iter().cloned());
    args
}

#[async_trait]
impl Tool for InstallDependenciesTool {
    fn name(&self) -> &'static str {
        "install_dependencies"
    }

    fn description(&self) -> &'static str {
        "Install npm packages into the project (npm install). Use dev=true for development dependencies."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "packages": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "description": "Package specs, e.g. react or @types/node@20"
                },
                "dev": {"type": "boolean", "description": "Install as devDependencies"}
            },
            "required": ["packages"]
        })
    }

    fn validate(&self, input: &Value) -> Result<(), String> {
        super::validate_against_schema(&self.input_schema(), input)?;
        let packages = input["packages"].as_array().cloned().unwrap_or_default();
        for package in packages.iter().filter_map(Value::as_str) {
            if !is_valid_package_spec(package) {
                return Err(format!("invalid package name '{}'", package));
            }
        }
        Ok(())
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let packages: Vec<String> = input["packages"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let dev = input.get("dev").and_then(Value::as_bool).unwrap_or(false);

        let root = match ctx.workspace.project_root(&ctx.project_id).await {
            Ok(root) => root,
            Err(e) => return ToolResult::failure(e.to_string()),
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(npm_install_args(&packages, dev));

        info!(task_id = %ctx.task_id, packages = ?packages, dev, "Installing dependencies");
        match run_sandboxed(cmd, &root, ctx.command_timeout).await {
            Ok(output) => process_result(output, "npm install")
                .with_payload(json!({"packages": packages, "dev": dev})),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "npm install could not start");
                ToolResult::failure(e)
            }
        }
    }
}

/// npm package spec: optional `@scope/`, a name, optional `@version`
fn is_valid_package_spec(spec: &str) -> bool {
    let (name, version) = match spec.strip_prefix('@') {
        Some(rest) => match rest.split_once('@') {
            Some((name, version)) => (format!("@{}", name), Some(version)),
            None => (spec.to_string(), None),
        },
        None => match spec.split_once('@') {
            Some((name, version)) => (name.to_string(), Some(version)),
            None => (spec.to_string(), None),
        },
    };

    let name_ok = |part: &str| {
        !part.is_empty()
            && !part.starts_with('.')
            && !part.starts_with('-')
            && part.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_' | '~')
            })
    };

    let name_valid = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, pkg)) => name_ok(scope) && name_ok(pkg),
            None => false,
        },
        None => name_ok(&name),
    };

    let version_valid = version.map_or(true, |v| {
        !v.is_empty()
            && v.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '^' | '~' | '-' | '+' | '*'))
    });

    name_valid && version_valid && name.len() <= 214
}

/// `sh -c <command>` inside the project root
pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the project root (e.g. npm run build). Output is captured; long-running commands are killed after the timeout."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "minLength": 1, "description": "Shell command to run"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let command = str_field(&input, "command");
        let root = match ctx.workspace.project_root(&ctx.project_id).await {
            Ok(root) => root,
            Err(e) => return ToolResult::failure(e.to_string()),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);

        info!(task_id = %ctx.task_id, command, "Running command");
        match run_sandboxed(cmd, &root, ctx.command_timeout).await {
            Ok(output) => {
                info!(
                    task_id = %ctx.task_id,
                    exit_code = output.exit_code,
                    timed_out = output.timed_out,
                    duration_ms = output.duration_ms,
                    "Command finished"
                );
                process_result(output, "command")
            }
            Err(e) => ToolResult::failure(e),
        }
    }
}
