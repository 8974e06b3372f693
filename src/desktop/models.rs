use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Identity as asserted by the auth proxy; written through `upsert_user`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertUser {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "directory" => Ok(Self::Directory),
            _ => Err(format!("Invalid file type: {}", s)),
        }
    }
}

/// A file or directory row. Directories link children through `parent_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: i64,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub content: Option<String>,
    pub size: i64,
    pub user_id: String,
    pub parent_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl FileNode {
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFile {
    pub name: String,
    pub path: String,
    pub kind: FileKind,
    pub content: Option<String>,
    pub size: i64,
    pub parent_id: Option<i64>,
}

impl NewFile {
    pub fn directory(name: &str, path: &str, parent_id: Option<i64>) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: FileKind::Directory,
            content: None,
            size: 0,
            parent_id,
        }
    }

    pub fn file(name: &str, path: &str, content: &str, parent_id: Option<i64>) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: FileKind::File,
            content: Some(content.to_string()),
            size: content.len() as i64,
            parent_id,
        }
    }
}

/// Partial update of a file row. `parent_id: Some(None)` moves the row to the root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilePatch {
    pub name: Option<String>,
    pub path: Option<String>,
    pub kind: Option<FileKind>,
    pub content: Option<String>,
    pub size: Option<i64>,
    pub parent_id: Option<Option<i64>>,
}

impl FilePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Nested view returned by the recursive tree fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileTreeNode {
    pub id: i64,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileTreeNode>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub total_files: usize,
    pub total_directories: usize,
    pub total_size: i64,
    pub recent_files: Vec<FileNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Invalid chat role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: ChatRole,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub id: i64,
    pub user_id: String,
    pub current_directory: String,
    pub created_at: String,
    pub updated_at: String,
}

pub const DEFAULT_TERMINAL_DIRECTORY: &str = "/home";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCommand {
    pub id: i64,
    pub session_id: i64,
    pub command: String,
    pub output: Option<String>,
    pub ai_interpretation: Option<String>,
    pub executed: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTerminalCommand {
    pub command: String,
    pub output: Option<String>,
    pub ai_interpretation: Option<String>,
    pub executed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserPermission {
    pub id: i64,
    pub user_id: String,
    pub permission: String,
    pub granted: bool,
    pub granted_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Cpu,
    Memory,
    Neural,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Neural => "neural",
        }
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "memory" => Ok(Self::Memory),
            "neural" => Ok(Self::Neural),
            _ => Err(format!("Invalid metric type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetric {
    pub id: i64,
    pub user_id: String,
    pub metric_type: MetricType,
    pub value: i64,
    pub timestamp: String,
}

/// Point-in-time percentages pushed over the WebSocket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cpu: u8,
    pub memory: u8,
    pub neural: u8,
}
