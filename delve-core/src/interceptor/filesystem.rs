//! Virtual filesystem tools: `ls`, `read_file`, `write_file`, `edit_file`.

use super::{Interceptor, Next};
use crate::config::FilesystemConfig;
use crate::message::ToolCallRequest;
use crate::tool::{ToolContext, ToolError, ToolResult, ToolSchema};
use crate::vfs::{VfsError, VirtualFs};
use async_trait::async_trait;
use serde_json::{json, Value};

const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

/// Serves the virtual filesystem in [`ToolContext::files`].
///
/// Evicted tool results live in the same namespace, so the model reads them
/// back with `read_file` like any other file.
#[derive(Debug, Default)]
pub struct Filesystem {
    config: FilesystemConfig,
}

impl Filesystem {
    pub fn new(config: FilesystemConfig) -> Self {
        Self { config }
    }

    fn ls(args: &Value, files: &VirtualFs) -> Result<ToolResult, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or("/");
        let entries = files.list(path).map_err(vfs_error)?;
        if entries.is_empty() {
            return Ok(ToolResult::new(format!("No files found in {path}")));
        }
        Ok(ToolResult::new(entries.join("\n")))
    }

    fn read(args: &Value, files: &VirtualFs) -> Result<ToolResult, ToolError> {
        let path = required_str(args, "file_path")?;
        let offset = optional_usize(args, "offset")?.unwrap_or(0);
        let limit = optional_usize(args, "limit")?.unwrap_or(DEFAULT_READ_LIMIT);
        let content = files.read(path).map_err(vfs_error)?;

        if content.trim().is_empty() {
            return Ok(ToolResult::new(
                "System reminder: File exists but has empty contents",
            ));
        }
        let lines: Vec<&str> = content.lines().collect();
        if offset >= lines.len() {
            return Err(ToolError::InvalidInput(format!(
                "Line offset {offset} exceeds file length ({} lines)",
                lines.len()
            )));
        }
        let end = (offset + limit).min(lines.len());
        let numbered = lines[offset..end]
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let line = crate::message::truncate_utf8(line, MAX_LINE_LENGTH);
                format!("{:6}\t{}", offset + i + 1, line)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolResult::with_metadata(
            numbered,
            json!({ "path": path, "lines": lines.len(), "offset": offset, "returned": end - offset }),
        ))
    }

    fn write(&self, args: &Value, files: &VirtualFs) -> Result<ToolResult, ToolError> {
        self.check_writable("write_file")?;
        let path = required_str(args, "file_path")?;
        let content = required_str(args, "content")?;
        let path = files.write(path, content).map_err(vfs_error)?;
        Ok(ToolResult::new(format!("Updated file {path}")))
    }

    fn edit(&self, args: &Value, files: &VirtualFs) -> Result<ToolResult, ToolError> {
        self.check_writable("edit_file")?;
        let path = required_str(args, "file_path")?;
        let old = required_str(args, "old_string")?;
        let new = required_str(args, "new_string")?;
        let replace_all = args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if old.is_empty() {
            return Err(ToolError::InvalidInput("old_string must not be empty".into()));
        }

        let content = files.read(path).map_err(vfs_error)?;
        let occurrences = content.matches(old).count();
        let updated = match occurrences {
            0 => {
                return Err(ToolError::InvalidInput(format!(
                    "String not found in file: '{old}'"
                )))
            }
            1 => content.replacen(old, new, 1),
            n if replace_all => {
                log::debug!("edit_file replacing {n} occurrences in {path}");
                content.replace(old, new)
            }
            n => {
                return Err(ToolError::InvalidInput(format!(
                    "String '{old}' appears {n} times in file. Use replace_all or give more context."
                )))
            }
        };
        let path = files.write(path, updated).map_err(vfs_error)?;
        let replaced = if replace_all { occurrences } else { 1 };
        Ok(ToolResult::new(format!(
            "Successfully replaced {replaced} instance(s) of the string in '{path}'"
        )))
    }

    fn check_writable(&self, tool: &str) -> Result<(), ToolError> {
        if self.config.read_only {
            return Err(ToolError::PolicyViolation(format!(
                "{tool} is not allowed: the filesystem is read-only"
            )));
        }
        Ok(())
    }
}

fn vfs_error(e: VfsError) -> ToolError {
    ToolError::InvalidInput(e.to_string())
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing string argument '{key}'")))
}

fn optional_usize(args: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ToolError::InvalidInput(format!("'{key}' must be a non-negative integer"))),
    }
}

#[async_trait]
impl Interceptor for Filesystem {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn tools(&self) -> Vec<ToolSchema> {
        let mut tools = vec![
            ToolSchema::new(
                "ls",
                "List files in the virtual filesystem, optionally under a directory.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Absolute directory path" }
                    }
                }),
            ),
            ToolSchema::new(
                "read_file",
                "Read a file from the virtual filesystem. Lines are numbered from 1. \
                 Use offset and limit to page through large files.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "offset": { "type": "integer", "description": "First line to read (0-based)" },
                        "limit": { "type": "integer", "description": "Number of lines to read" }
                    },
                    "required": ["file_path"]
                }),
            ),
        ];
        if !self.config.read_only {
            tools.push(ToolSchema::new(
                "write_file",
                "Create or overwrite a file in the virtual filesystem.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["file_path", "content"]
                }),
            ));
            tools.push(ToolSchema::new(
                "edit_file",
                "Replace an exact string in a file. The string must be unique unless replace_all is set.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "old_string": { "type": "string" },
                        "new_string": { "type": "string" },
                        "replace_all": { "type": "boolean" }
                    },
                    "required": ["file_path", "old_string", "new_string"]
                }),
            ));
        }
        tools
    }

    async fn around_tool(
        &self,
        call: ToolCallRequest,
        ctx: &ToolContext,
        next: Next<'_>,
    ) -> Result<ToolResult, ToolError> {
        let files = ctx.files.as_ref();
        match call.name.as_str() {
            "ls" => Self::ls(&call.arguments, files),
            "read_file" => Self::read(&call.arguments, files),
            "write_file" => self.write(&call.arguments, files),
            "edit_file" => self.edit(&call.arguments, files),
            _ => next.run(call, ctx).await,
        }
    }
}
