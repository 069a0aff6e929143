//! File tools: create, edit, read, list
//!
//! All paths are resolved through the workspace; a tool never builds an
//! absolute path itself.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_field, Tool, ToolContext, ToolResult};
use crate::progress::FileMutation;

/// Write a file, creating parent directories and overwriting existing content
pub struct CreateFileTool;

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &'static str {
        "create_file"
    }

    fn description(&self) -> &'static str {
        "Create a file in the project (or overwrite it). Parent directories are created as needed. Paths are relative to the project root."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the project root"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        create_file(&input, ctx).await.unwrap_or_else(ToolResult::failure)
    }
}

async fn create_file(input: &Value, ctx: &ToolContext) -> Result<ToolResult, String> {
    let content = str_field(input, "content");
    let path = ctx
        .workspace
        .resolve(&ctx.project_id, str_field(input, "path"))
        .await
        .map_err(|e| e.to_string())?;
    let display = ctx.workspace.display_path(&ctx.project_id, &path);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("Failed to create directories for {}: {}", display, e))?;
    }
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| format!("Failed to write {}: {}", display, e))?;

    Ok(ToolResult::ok(json!({"path": display, "bytes": content.len()}))
        .with_mutation(FileMutation::create(display, content)))
}

/// Replace the first occurrence of `old_content` with `new_content`
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Edit an existing file by replacing the first occurrence of old_content with new_content. old_content must match the file exactly."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the project root"},
                "old_content": {"type": "string", "description": "Exact text to replace"},
                "new_content": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_content", "new_content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        edit_file(&input, ctx).await.unwrap_or_else(ToolResult::failure)
    }
}

async fn edit_file(input: &Value, ctx: &ToolContext) -> Result<ToolResult, String> {
    let old_content = str_field(input, "old_content");
    let new_content = str_field(input, "new_content");
    let path = ctx
        .workspace
        .resolve(&ctx.project_id, str_field(input, "path"))
        .await
        .map_err(|e| e.to_string())?;
    let display = ctx.workspace.display_path(&ctx.project_id, &path);

    if old_content.is_empty() {
        return Err("old_content must not be empty".to_string());
    }

    let current = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", display, e))?;

    if !current.contains(old_content) {
        return Err(format!(
            "old_content was not found in {}; no changes were made",
            display
        ));
    }

    let updated = current.replacen(old_content, new_content, 1);
    tokio::fs::write(&path, &updated)
        .await
        .map_err(|e| format!("Failed to write {}: {}", display, e))?;

    Ok(ToolResult::ok(json!({"path": display, "replacements": 1}))
        .with_mutation(FileMutation::edit(display, updated)))
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a text file from the project."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the project root"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        read_file(&input, ctx).await.unwrap_or_else(ToolResult::failure)
    }
}

async fn read_file(input: &Value, ctx: &ToolContext) -> Result<ToolResult, String> {
    let path = ctx
        .workspace
        .resolve(&ctx.project_id, str_field(input, "path"))
        .await
        .map_err(|e| e.to_string())?;
    let display = ctx.workspace.display_path(&ctx.project_id, &path);

    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", display, e))?;

    Ok(ToolResult::ok(json!({"path": display, "content": content})))
}

/// Non-recursive directory listing, sorted by name
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List the entries of a project directory (non-recursive). Defaults to the project root."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the project root (default \".\")"}
            }
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        list_files(&input, ctx).await.unwrap_or_else(ToolResult::failure)
    }
}

async fn list_files(input: &Value, ctx: &ToolContext) -> Result<ToolResult, String> {
    let relative = input.get("path").and_then(Value::as_str).unwrap_or(".");
    let dir = ctx
        .workspace
        .resolve(&ctx.project_id, relative)
        .await
        .map_err(|e| e.to_string())?;
    let display = ctx.workspace.display_path(&ctx.project_id, &dir);

    let mut reader = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| format!("Failed to list {}: {}", display, e))?;

    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| format!("Failed to list {}: {}", display, e))?
    {
        let kind = match entry.file_type().await {
            Ok(ft) if ft.is_dir() => "dir",
            _ => "file",
        };
        entries.push((entry.file_name().to_string_lossy().into_owned(), kind));
    }
    entries.sort();

    let entries: Vec<Value> = entries
        .into_iter()
        .map(|(name, kind)| json!({"name": name, "kind": kind}))
        .collect();

    Ok(ToolResult::ok(json!({"path": display, "entries": entries})))
}
