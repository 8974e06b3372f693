use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use crate::errors::DesktopError;

/// Async-safe handle to the desktop database.
///
/// Wraps `DesktopDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DesktopDb>>,
}

impl DbHandle {
    pub fn new(db: DesktopDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DesktopDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| DesktopError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct DesktopDb {
    conn: Connection,
}

fn parse_column<T>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, profile_image_url, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        profile_image_url: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const FILE_COLUMNS: &str =
    "id, name, path, kind, content, size, user_id, parent_id, created_at, updated_at";

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileNode> {
    Ok(FileNode {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        kind: parse_column(3, row.get(3)?)?,
        content: row.get(4)?,
        size: row.get(5)?,
        user_id: row.get(6)?,
        parent_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const CHAT_SESSION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";

fn chat_session_from_row(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

const CHAT_MESSAGE_COLUMNS: &str = "id, session_id, role, content, created_at";

fn chat_message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: parse_column(2, row.get(2)?)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const TERMINAL_SESSION_COLUMNS: &str = "id, user_id, current_directory, created_at, updated_at";

fn terminal_session_from_row(row: &Row<'_>) -> rusqlite::Result<TerminalSession> {
    Ok(TerminalSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        current_directory: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

const TERMINAL_COMMAND_COLUMNS: &str =
    "id, session_id, command, output, ai_interpretation, executed, created_at";

fn terminal_command_from_row(row: &Row<'_>) -> rusqlite::Result<TerminalCommand> {
    Ok(TerminalCommand {
        id: row.get(0)?,
        session_id: row.get(1)?,
        command: row.get(2)?,
        output: row.get(3)?,
        ai_interpretation: row.get(4)?,
        executed: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const PERMISSION_COLUMNS: &str = "id, user_id, permission, granted, granted_by, created_at";

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<UserPermission> {
    Ok(UserPermission {
        id: row.get(0)?,
        user_id: row.get(1)?,
        permission: row.get(2)?,
        granted: row.get(3)?,
        granted_by: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const METRIC_COLUMNS: &str = "id, user_id, metric_type, value, timestamp";

fn metric_from_row(row: &Row<'_>) -> rusqlite::Result<SystemMetric> {
    Ok(SystemMetric {
        id: row.get(0)?,
        user_id: row.get(1)?,
        metric_type: parse_column(2, row.get(2)?)?,
        value: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

impl DesktopDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY NOT NULL,
                    email TEXT UNIQUE,
                    first_name TEXT,
                    last_name TEXT,
                    profile_image_url TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    content TEXT,
                    size INTEGER NOT NULL DEFAULT 0,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    parent_id INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS chat_sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS terminal_sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    current_directory TEXT NOT NULL DEFAULT '/home',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS terminal_commands (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id INTEGER NOT NULL REFERENCES terminal_sessions(id) ON DELETE CASCADE,
                    command TEXT NOT NULL,
                    output TEXT,
                    ai_interpretation TEXT,
                    executed INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS user_permissions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    permission TEXT NOT NULL,
                    granted INTEGER NOT NULL DEFAULT 0,
                    granted_by TEXT REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS system_metrics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    metric_type TEXT NOT NULL,
                    value INTEGER NOT NULL,
                    timestamp TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_files_user_parent ON files(user_id, parent_id);
                CREATE INDEX IF NOT EXISTS idx_chat_sessions_user ON chat_sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id);
                CREATE INDEX IF NOT EXISTS idx_terminal_sessions_user ON terminal_sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_terminal_commands_session ON terminal_commands(session_id);
                CREATE INDEX IF NOT EXISTS idx_user_permissions_user ON user_permissions(user_id);
                CREATE INDEX IF NOT EXISTS idx_system_metrics_user_type ON system_metrics(user_id, metric_type);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    /// Insert the user or refresh its profile fields and `updated_at`.
    pub fn upsert_user(&self, user: &UpsertUser) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (id, email, first_name, last_name, profile_image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    email = COALESCE(excluded.email, users.email),
                    first_name = COALESCE(excluded.first_name, users.first_name),
                    last_name = COALESCE(excluded.last_name, users.last_name),
                    profile_image_url = COALESCE(excluded.profile_image_url, users.profile_image_url),
                    updated_at = datetime('now')",
                params![
                    user.id,
                    user.email,
                    user.first_name,
                    user.last_name,
                    user.profile_image_url
                ],
            )
            .context("Failed to upsert user")?;
        self.get_user(&user.id)?
            .context("User not found after upsert")
    }

    /// Make sure a row exists for `id` without touching an existing profile.
    pub fn ensure_user(&self, id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id) VALUES (?1) ON CONFLICT(id) DO NOTHING",
                params![id],
            )
            .context("Failed to ensure user")?;
        Ok(())
    }

    // ── Files ─────────────────────────────────────────────────────────

    /// Children of `parent_id`, or root rows when `None`. Directories first,
    /// then by name.
    pub fn list_files(&self, user_id: &str, parent_id: Option<i64>) -> Result<Vec<FileNode>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files
                 WHERE user_id = ?1 AND parent_id IS ?2
                 ORDER BY kind ASC, name ASC"
            ))
            .context("Failed to prepare list_files")?;
        let rows = stmt
            .query_map(params![user_id, parent_id], file_from_row)
            .context("Failed to query files")?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row.context("Failed to read file row")?);
        }
        Ok(files)
    }

    pub fn list_all_files(&self, user_id: &str) -> Result<Vec<FileNode>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE user_id = ?1 ORDER BY path ASC"
            ))
            .context("Failed to prepare list_all_files")?;
        let rows = stmt
            .query_map(params![user_id], file_from_row)
            .context("Failed to query files")?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row.context("Failed to read file row")?);
        }
        Ok(files)
    }

    pub fn count_files(&self, user_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM files WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count files")
    }

    pub fn get_file(&self, id: i64, user_id: &str) -> Result<Option<FileNode>> {
        self.conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                file_from_row,
            )
            .optional()
            .context("Failed to query file")
    }

    /// Directory owned by `user_id` whose path is exactly `path`.
    pub fn find_directory_by_path(&self, user_id: &str, path: &str) -> Result<Option<FileNode>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {FILE_COLUMNS} FROM files
                     WHERE user_id = ?1 AND path = ?2 AND kind = 'directory'
                     ORDER BY id LIMIT 1"
                ),
                params![user_id, path],
                file_from_row,
            )
            .optional()
            .context("Failed to query directory by path")
    }

    pub fn create_file(&self, user_id: &str, file: &NewFile) -> Result<FileNode> {
        self.conn
            .execute(
                "INSERT INTO files (name, path, kind, content, size, user_id, parent_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    file.name,
                    file.path,
                    file.kind.as_str(),
                    file.content,
                    file.size,
                    user_id,
                    file.parent_id
                ],
            )
            .context("Failed to insert file")?;
        let id = self.conn.last_insert_rowid();
        self.get_file(id, user_id)?
            .context("File not found after insert")
    }

    /// Apply a partial update. Fails with `FileNotFound` when the row does not
    /// belong to `user_id`.
    pub fn update_file(&self, id: i64, user_id: &str, patch: &FilePatch) -> Result<FileNode> {
        if self.get_file(id, user_id)?.is_none() {
            return Err(DesktopError::FileNotFound { id }.into());
        }

        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(name) = &patch.name {
            tx.execute(
                "UPDATE files SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to update file name")?;
        }
        if let Some(path) = &patch.path {
            tx.execute(
                "UPDATE files SET path = ?1 WHERE id = ?2",
                params![path, id],
            )
            .context("Failed to update file path")?;
        }
        if let Some(kind) = &patch.kind {
            tx.execute(
                "UPDATE files SET kind = ?1 WHERE id = ?2",
                params![kind.as_str(), id],
            )
            .context("Failed to update file kind")?;
        }
        if let Some(content) = &patch.content {
            tx.execute(
                "UPDATE files SET content = ?1 WHERE id = ?2",
                params![content, id],
            )
            .context("Failed to update file content")?;
        }
        if let Some(size) = patch.size {
            tx.execute(
                "UPDATE files SET size = ?1 WHERE id = ?2",
                params![size, id],
            )
            .context("Failed to update file size")?;
        }
        if let Some(parent_id) = patch.parent_id {
            tx.execute(
                "UPDATE files SET parent_id = ?1 WHERE id = ?2",
                params![parent_id, id],
            )
            .context("Failed to update file parent")?;
        }
        tx.execute(
            "UPDATE files SET updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )
        .context("Failed to touch file")?;

        tx.commit().context("Failed to commit file update")?;
        self.get_file(id, user_id)?
            .context("File not found after update")
    }

    pub fn delete_file(&self, id: i64, user_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM files WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete file")?;
        Ok(count > 0)
    }

    /// Case-insensitive substring match over name and content. Folding is
    /// done in Rust because SQLite's `lower()` only folds ASCII.
    pub fn search_files(&self, user_id: &str, query: &str) -> Result<Vec<FileNode>> {
        let needle = query.to_lowercase();
        let mut files: Vec<FileNode> = self
            .list_all_files(user_id)?
            .into_iter()
            .filter(|f| {
                f.name.to_lowercase().contains(&needle)
                    || f
                        .content
                        .as_deref()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    // ── Chat ──────────────────────────────────────────────────────────

    /// Most recently active first.
    pub fn list_chat_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions
                 WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC"
            ))
            .context("Failed to prepare list_chat_sessions")?;
        let rows = stmt
            .query_map(params![user_id], chat_session_from_row)
            .context("Failed to query chat sessions")?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.context("Failed to read chat session row")?);
        }
        Ok(sessions)
    }

    pub fn get_chat_session(&self, id: i64, user_id: &str) -> Result<Option<ChatSession>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
                chat_session_from_row,
            )
            .optional()
            .context("Failed to query chat session")
    }

    pub fn create_chat_session(&self, user_id: &str, title: &str) -> Result<ChatSession> {
        self.conn
            .execute(
                "INSERT INTO chat_sessions (user_id, title) VALUES (?1, ?2)",
                params![user_id, title],
            )
            .context("Failed to insert chat session")?;
        let id = self.conn.last_insert_rowid();
        self.get_chat_session(id, user_id)?
            .context("Chat session not found after insert")
    }

    /// Messages of a session owned by `user_id`, oldest first.
    pub fn list_chat_messages(&self, session_id: i64, user_id: &str) -> Result<Vec<ChatMessage>> {
        if self.get_chat_session(session_id, user_id)?.is_none() {
            return Err(DesktopError::ChatSessionNotFound { id: session_id }.into());
        }
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHAT_MESSAGE_COLUMNS} FROM chat_messages
                 WHERE session_id = ?1 ORDER BY created_at ASC, id ASC"
            ))
            .context("Failed to prepare list_chat_messages")?;
        let rows = stmt
            .query_map(params![session_id], chat_message_from_row)
            .context("Failed to query chat messages")?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.context("Failed to read chat message row")?);
        }
        Ok(messages)
    }

    /// Append a message and bump the session's `updated_at`.
    pub fn create_chat_message(
        &self,
        session_id: i64,
        role: ChatRole,
        content: &str,
    ) -> Result<ChatMessage> {
        self.conn
            .execute(
                "INSERT INTO chat_messages (session_id, role, content) VALUES (?1, ?2, ?3)",
                params![session_id, role.as_str(), content],
            )
            .context("Failed to insert chat message")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "UPDATE chat_sessions SET updated_at = datetime('now') WHERE id = ?1",
                params![session_id],
            )
            .context("Failed to touch chat session")?;
        self.conn
            .query_row(
                &format!("SELECT {CHAT_MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
                chat_message_from_row,
            )
            .context("Chat message not found after insert")
    }

    // ── Terminal ──────────────────────────────────────────────────────

    pub fn latest_terminal_session(&self, user_id: &str) -> Result<Option<TerminalSession>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TERMINAL_SESSION_COLUMNS} FROM terminal_sessions
                     WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC LIMIT 1"
                ),
                params![user_id],
                terminal_session_from_row,
            )
            .optional()
            .context("Failed to query terminal session")
    }

    pub fn get_terminal_session(&self, id: i64, user_id: &str) -> Result<Option<TerminalSession>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TERMINAL_SESSION_COLUMNS} FROM terminal_sessions
                     WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
                terminal_session_from_row,
            )
            .optional()
            .context("Failed to query terminal session")
    }

    pub fn create_terminal_session(
        &self,
        user_id: &str,
        current_directory: &str,
    ) -> Result<TerminalSession> {
        self.conn
            .execute(
                "INSERT INTO terminal_sessions (user_id, current_directory) VALUES (?1, ?2)",
                params![user_id, current_directory],
            )
            .context("Failed to insert terminal session")?;
        let id = self.conn.last_insert_rowid();
        self.get_terminal_session(id, user_id)?
            .context("Terminal session not found after insert")
    }

    pub fn update_terminal_session(
        &self,
        id: i64,
        user_id: &str,
        current_directory: &str,
    ) -> Result<TerminalSession> {
        let count = self
            .conn
            .execute(
                "UPDATE terminal_sessions SET current_directory = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND user_id = ?3",
                params![current_directory, id, user_id],
            )
            .context("Failed to update terminal session")?;
        if count == 0 {
            return Err(DesktopError::TerminalSessionNotFound { id }.into());
        }
        self.get_terminal_session(id, user_id)?
            .context("Terminal session not found after update")
    }

    /// Newest first.
    pub fn list_terminal_commands(&self, session_id: i64, limit: i64) -> Result<Vec<TerminalCommand>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TERMINAL_COMMAND_COLUMNS} FROM terminal_commands
                 WHERE session_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))
            .context("Failed to prepare list_terminal_commands")?;
        let rows = stmt
            .query_map(params![session_id, limit], terminal_command_from_row)
            .context("Failed to query terminal commands")?;
        let mut commands = Vec::new();
        for row in rows {
            commands.push(row.context("Failed to read terminal command row")?);
        }
        Ok(commands)
    }

    pub fn create_terminal_command(
        &self,
        session_id: i64,
        command: &NewTerminalCommand,
    ) -> Result<TerminalCommand> {
        self.conn
            .execute(
                "INSERT INTO terminal_commands (session_id, command, output, ai_interpretation, executed)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id,
                    command.command,
                    command.output,
                    command.ai_interpretation,
                    command.executed
                ],
            )
            .context("Failed to insert terminal command")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {TERMINAL_COMMAND_COLUMNS} FROM terminal_commands WHERE id = ?1"),
                params![id],
                terminal_command_from_row,
            )
            .context("Terminal command not found after insert")
    }

    // ── Permissions ───────────────────────────────────────────────────

    pub fn list_permissions(&self, user_id: &str) -> Result<Vec<UserPermission>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PERMISSION_COLUMNS} FROM user_permissions
                 WHERE user_id = ?1 ORDER BY permission ASC, id ASC"
            ))
            .context("Failed to prepare list_permissions")?;
        let rows = stmt
            .query_map(params![user_id], permission_from_row)
            .context("Failed to query permissions")?;
        let mut permissions = Vec::new();
        for row in rows {
            permissions.push(row.context("Failed to read permission row")?);
        }
        Ok(permissions)
    }

    pub fn get_permission(&self, id: i64) -> Result<Option<UserPermission>> {
        self.conn
            .query_row(
                &format!("SELECT {PERMISSION_COLUMNS} FROM user_permissions WHERE id = ?1"),
                params![id],
                permission_from_row,
            )
            .optional()
            .context("Failed to query permission")
    }

    /// Record a permission for `user_id`. The target user must already exist.
    pub fn create_permission(
        &self,
        user_id: &str,
        permission: &str,
        granted: bool,
        granted_by: &str,
    ) -> Result<UserPermission> {
        if self.get_user(user_id)?.is_none() {
            return Err(DesktopError::UserNotFound {
                id: user_id.to_string(),
            }
            .into());
        }
        self.conn
            .execute(
                "INSERT INTO user_permissions (user_id, permission, granted, granted_by)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, permission, granted, granted_by],
            )
            .context("Failed to insert permission")?;
        let id = self.conn.last_insert_rowid();
        self.get_permission(id)?
            .context("Permission not found after insert")
    }

    pub fn update_permission(
        &self,
        id: i64,
        granted: bool,
        granted_by: &str,
    ) -> Result<UserPermission> {
        let count = self
            .conn
            .execute(
                "UPDATE user_permissions SET granted = ?1, granted_by = ?2, created_at = datetime('now')
                 WHERE id = ?3",
                params![granted, granted_by, id],
            )
            .context("Failed to update permission")?;
        if count == 0 {
            return Err(DesktopError::PermissionNotFound { id }.into());
        }
        self.get_permission(id)?
            .context("Permission not found after update")
    }

    // ── Metrics ───────────────────────────────────────────────────────

    /// Newest first, optionally filtered by type.
    pub fn list_metrics(
        &self,
        user_id: &str,
        metric_type: Option<MetricType>,
        limit: i64,
    ) -> Result<Vec<SystemMetric>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {METRIC_COLUMNS} FROM system_metrics
                 WHERE user_id = ?1 AND (?2 IS NULL OR metric_type = ?2)
                 ORDER BY timestamp DESC, id DESC LIMIT ?3"
            ))
            .context("Failed to prepare list_metrics")?;
        let rows = stmt
            .query_map(
                params![user_id, metric_type.map(|t| t.as_str()), limit],
                metric_from_row,
            )
            .context("Failed to query metrics")?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row.context("Failed to read metric row")?);
        }
        Ok(metrics)
    }

    pub fn create_metric(
        &self,
        user_id: &str,
        metric_type: MetricType,
        value: i64,
    ) -> Result<SystemMetric> {
        self.conn
            .execute(
                "INSERT INTO system_metrics (user_id, metric_type, value) VALUES (?1, ?2, ?3)",
                params![user_id, metric_type.as_str(), value],
            )
            .context("Failed to insert metric")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {METRIC_COLUMNS} FROM system_metrics WHERE id = ?1"),
                params![id],
                metric_from_row,
            )
            .context("Metric not found after insert")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user(id: &str) -> Result<DesktopDb> {
        let db = DesktopDb::new_in_memory()?;
        db.ensure_user(id)?;
        Ok(db)
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = DesktopDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('users', 'files', 'chat_sessions', 'chat_messages', 'terminal_sessions',
              'terminal_commands', 'user_permissions', 'system_metrics')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 8, "Expected 8 tables to exist");
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let db = DesktopDb::new_in_memory()?;
        db.run_migrations()?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_upsert_user_inserts_then_updates() -> Result<()> {
        let db = DesktopDb::new_in_memory()?;
        let user = db.upsert_user(&UpsertUser {
            id: "u1".into(),
            email: Some("a@example.com".into()),
            first_name: Some("Ada".into()),
            ..Default::default()
        })?;
        assert_eq!(user.email.as_deref(), Some("a@example.com"));

        let user = db.upsert_user(&UpsertUser {
            id: "u1".into(),
            last_name: Some("Lovelace".into()),
            ..Default::default()
        })?;
        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert_eq!(user.last_name.as_deref(), Some("Lovelace"));
        Ok(())
    }

    #[test]
    fn test_ensure_user_keeps_profile() -> Result<()> {
        let db = DesktopDb::new_in_memory()?;
        db.upsert_user(&UpsertUser {
            id: "u1".into(),
            email: Some("a@example.com".into()),
            ..Default::default()
        })?;
        db.ensure_user("u1")?;
        let user = db.get_user("u1")?.expect("user should exist");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
        Ok(())
    }

    #[test]
    fn test_list_files_orders_directories_first() -> Result<()> {
        let db = db_with_user("u1")?;
        db.create_file("u1", &NewFile::file("b.txt", "/b.txt", "b", None))?;
        db.create_file("u1", &NewFile::directory("z", "/z", None))?;
        db.create_file("u1", &NewFile::file("a.txt", "/a.txt", "a", None))?;

        let names: Vec<String> = db
            .list_files("u1", None)?
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["z", "a.txt", "b.txt"]);
        Ok(())
    }

    #[test]
    fn test_list_files_by_parent() -> Result<()> {
        let db = db_with_user("u1")?;
        let dir = db.create_file("u1", &NewFile::directory("docs", "/docs", None))?;
        db.create_file("u1", &NewFile::file("x", "/docs/x", "", Some(dir.id)))?;
        db.create_file("u1", &NewFile::file("y", "/y", "", None))?;

        let children = db.list_files("u1", Some(dir.id))?;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "x");
        assert_eq!(db.list_files("u1", None)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_files_are_scoped_to_owner() -> Result<()> {
        let db = db_with_user("alice")?;
        db.ensure_user("bob")?;
        let file = db.create_file("alice", &NewFile::file("secret", "/secret", "s", None))?;

        assert!(db.get_file(file.id, "bob")?.is_none());
        assert!(db.list_files("bob", None)?.is_empty());
        assert!(!db.delete_file(file.id, "bob")?);

        let err = db
            .update_file(file.id, "bob", &FilePatch { name: Some("x".into()), ..Default::default() })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DesktopError>(),
            Some(DesktopError::FileNotFound { .. })
        ));
        assert_eq!(db.get_file(file.id, "alice")?.expect("still there").name, "secret");
        Ok(())
    }

    #[test]
    fn test_update_file_partial() -> Result<()> {
        let db = db_with_user("u1")?;
        let file = db.create_file("u1", &NewFile::file("a.txt", "/a.txt", "old", None))?;
        let updated = db.update_file(
            file.id,
            "u1",
            &FilePatch {
                content: Some("new content".into()),
                size: Some(11),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.content.as_deref(), Some("new content"));
        assert_eq!(updated.size, 11);
        assert_eq!(updated.name, "a.txt");
        Ok(())
    }

    #[test]
    fn test_update_file_can_clear_parent() -> Result<()> {
        let db = db_with_user("u1")?;
        let dir = db.create_file("u1", &NewFile::directory("d", "/d", None))?;
        let file = db.create_file("u1", &NewFile::file("f", "/d/f", "", Some(dir.id)))?;
        let moved = db.update_file(
            file.id,
            "u1",
            &FilePatch {
                parent_id: Some(None),
                path: Some("/f".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(moved.parent_id, None);
        assert_eq!(moved.path, "/f");
        Ok(())
    }

    #[test]
    fn test_search_files_is_case_insensitive() -> Result<()> {
        let db = db_with_user("u1")?;
        db.create_file("u1", &NewFile::file("Report.md", "/Report.md", "quarterly", None))?;
        db.create_file("u1", &NewFile::file("notes.txt", "/notes.txt", "See the REPORT", None))?;
        db.create_file("u1", &NewFile::file("other", "/other", "nothing", None))?;

        let hits = db.search_files("u1", "report")?;
        assert_eq!(hits.len(), 2);
        Ok(())
    }

    #[test]
    fn test_search_files_folds_non_ascii() -> Result<()> {
        let db = db_with_user("u1")?;
        db.create_file("u1", &NewFile::file("École.txt", "/École.txt", "", None))?;
        db.create_file("u1", &NewFile::file("straße.md", "/straße.md", "ÜBER alles", None))?;
        assert_eq!(db.search_files("u1", "école")?.len(), 1);
        assert_eq!(db.search_files("u1", "ÉCOLE")?.len(), 1);
        assert_eq!(db.search_files("u1", "über")?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_search_files_treats_wildcards_literally() -> Result<()> {
        let db = db_with_user("u1")?;
        db.create_file("u1", &NewFile::file("100%.txt", "/100%.txt", "", None))?;
        db.create_file("u1", &NewFile::file("1000.txt", "/1000.txt", "", None))?;
        let hits = db.search_files("u1", "0%")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "100%.txt");
        Ok(())
    }

    #[test]
    fn test_find_directory_by_path_ignores_files() -> Result<()> {
        let db = db_with_user("u1")?;
        db.create_file("u1", &NewFile::file("home", "/home", "", None))?;
        assert!(db.find_directory_by_path("u1", "/home")?.is_none());
        let dir = db.create_file("u1", &NewFile::directory("home", "/home", None))?;
        assert_eq!(db.find_directory_by_path("u1", "/home")?.map(|d| d.id), Some(dir.id));
        Ok(())
    }

    #[test]
    fn test_chat_messages_require_owned_session() -> Result<()> {
        let db = db_with_user("alice")?;
        db.ensure_user("bob")?;
        let session = db.create_chat_session("alice", "Help")?;
        db.create_chat_message(session.id, ChatRole::User, "hi")?;
        db.create_chat_message(session.id, ChatRole::Assistant, "hello")?;

        let messages = db.list_chat_messages(session.id, "alice")?;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[1].content, "hello");

        let err = db.list_chat_messages(session.id, "bob").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DesktopError>(),
            Some(DesktopError::ChatSessionNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_chat_sessions_listed_most_recent_first() -> Result<()> {
        let db = db_with_user("u1")?;
        let first = db.create_chat_session("u1", "first")?;
        let second = db.create_chat_session("u1", "second")?;
        let sessions = db.list_chat_sessions("u1")?;
        assert_eq!(sessions[0].id, second.id);
        assert_eq!(sessions[1].id, first.id);
        Ok(())
    }

    #[test]
    fn test_terminal_session_lifecycle() -> Result<()> {
        let db = db_with_user("u1")?;
        assert!(db.latest_terminal_session("u1")?.is_none());
        let session = db.create_terminal_session("u1", DEFAULT_TERMINAL_DIRECTORY)?;
        assert_eq!(session.current_directory, "/home");

        let updated = db.update_terminal_session(session.id, "u1", "/home/Documents")?;
        assert_eq!(updated.current_directory, "/home/Documents");
        assert_eq!(db.latest_terminal_session("u1")?.map(|s| s.id), Some(session.id));

        db.ensure_user("u2")?;
        let err = db.update_terminal_session(session.id, "u2", "/").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DesktopError>(),
            Some(DesktopError::TerminalSessionNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_terminal_commands_newest_first_with_limit() -> Result<()> {
        let db = db_with_user("u1")?;
        let session = db.create_terminal_session("u1", "/home")?;
        for i in 0..5 {
            db.create_terminal_command(
                session.id,
                &NewTerminalCommand {
                    command: format!("cmd {}", i),
                    executed: true,
                    ..Default::default()
                },
            )?;
        }
        let commands = db.list_terminal_commands(session.id, 3)?;
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].command, "cmd 4");
        assert!(commands[0].executed);
        Ok(())
    }

    #[test]
    fn test_permissions_create_and_update() -> Result<()> {
        let db = db_with_user("admin")?;
        db.ensure_user("u1")?;
        let perm = db.create_permission("u1", "terminal.exec", false, "admin")?;
        assert!(!perm.granted);
        assert_eq!(perm.granted_by.as_deref(), Some("admin"));

        let perm = db.update_permission(perm.id, true, "admin")?;
        assert!(perm.granted);

        assert_eq!(db.list_permissions("u1")?.len(), 1);
        assert!(db.list_permissions("admin")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_permission_for_unknown_user_is_not_found() -> Result<()> {
        let db = db_with_user("admin")?;
        let err = db.create_permission("ghost", "files.read", true, "admin").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DesktopError>(),
            Some(DesktopError::UserNotFound { .. })
        ));
        let err = db.update_permission(999, true, "admin").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DesktopError>(),
            Some(DesktopError::PermissionNotFound { id: 999 })
        ));
        Ok(())
    }

    #[test]
    fn test_metrics_filter_and_limit() -> Result<()> {
        let db = db_with_user("u1")?;
        db.create_metric("u1", MetricType::Cpu, 10)?;
        db.create_metric("u1", MetricType::Memory, 20)?;
        db.create_metric("u1", MetricType::Cpu, 30)?;

        let all = db.list_metrics("u1", None, 100)?;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].value, 30);

        let cpu = db.list_metrics("u1", Some(MetricType::Cpu), 100)?;
        assert_eq!(cpu.len(), 2);
        assert!(cpu.iter().all(|m| m.metric_type == MetricType::Cpu));

        let limited = db.list_metrics("u1", None, 1)?;
        assert_eq!(limited.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(DesktopDb::new_in_memory()?);
        let user = handle
            .call(|db| {
                db.upsert_user(&UpsertUser {
                    id: "u1".into(),
                    ..Default::default()
                })
            })
            .await?;
        assert_eq!(user.id, "u1");
        Ok(())
    }
}
