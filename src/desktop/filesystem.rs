//! Per-user virtual file system layered on the `files` table.
//!
//! Every function takes the locked `DesktopDb` so a multi-row operation runs
//! inside a single `DbHandle::call`.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::db::DesktopDb;
use super::models::{FileKind, FileNode, FilePatch, FileStats, FileTreeNode, NewFile};
use crate::errors::DesktopError;

const DEFAULT_DIRECTORIES: &[&str] = &[
    "/home",
    "/home/Desktop",
    "/home/Documents",
    "/home/Downloads",
    "/home/Pictures",
    "/home/AI_Models",
];

const WELCOME_TXT: &str = "Welcome to AI OS!\n\nThis is your personalized Linux environment powered by artificial intelligence.\n\nGet started by:\n1. Exploring the file system\n2. Using the AI terminal\n3. Chatting with your AI assistant\n\nEnjoy your AI-enhanced computing experience!";

const NEURAL_NETWORK_PY: &str = "import tensorflow as tf\nfrom tensorflow import keras\n\n# Sample neural network implementation\nclass NeuralNetwork:\n    def __init__(self, input_size, hidden_size, output_size):\n        self.model = keras.Sequential([\n            keras.layers.Dense(hidden_size, activation='relu', input_shape=(input_size,)),\n            keras.layers.Dense(output_size, activation='softmax')\n        ])\n        \n    def compile(self, optimizer='adam', loss='categorical_crossentropy'):\n        self.model.compile(optimizer=optimizer, loss=loss, metrics=['accuracy'])\n        \n    def train(self, X, y, epochs=10):\n        return self.model.fit(X, y, epochs=epochs, validation_split=0.2)\n        \n    def predict(self, X):\n        return self.model.predict(X)\n";

const DEFAULT_FILES: &[(&str, &str)] = &[
    ("/home/welcome.txt", WELCOME_TXT),
    ("/home/neural_network.py", NEURAL_NETWORK_PY),
];

const RECENT_FILES_LIMIT: usize = 10;

/// Split `/a/b/c` into (`/a/b`, `c`). Root-level entries have parent `/`.
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

/// `parent/name`, collapsing the root so children of `/` become `/name`.
pub fn join_path(parent_path: &str, name: &str) -> String {
    let parent = parent_path.trim_end_matches('/');
    format!("{}/{}", parent, name)
}

fn resolve_parent(db: &DesktopDb, user_id: &str, parent_path: &str) -> Result<Option<i64>> {
    if parent_path.trim_end_matches('/').is_empty() {
        return Ok(None);
    }
    Ok(db
        .find_directory_by_path(user_id, parent_path.trim_end_matches('/'))?
        .map(|dir| dir.id))
}

/// Seed the default home layout. A user with any existing row is left
/// untouched. Returns whether anything was created.
pub fn initialize_user_filesystem(db: &DesktopDb, user_id: &str) -> Result<bool> {
    if db.count_files(user_id)? > 0 {
        return Ok(false);
    }

    for path in DEFAULT_DIRECTORIES {
        let (parent_path, name) = split_path(path);
        let parent_id = resolve_parent(db, user_id, parent_path)?;
        db.create_file(user_id, &NewFile::directory(name, path, parent_id))?;
    }
    for (path, content) in DEFAULT_FILES {
        let (parent_path, name) = split_path(path);
        let parent_id = resolve_parent(db, user_id, parent_path)?;
        db.create_file(user_id, &NewFile::file(name, path, content, parent_id))?;
    }

    info!(user_id, "Initialized default file system");
    Ok(true)
}

/// Nested listing starting at `parent_id` (roots when `None`). A row that
/// is reached twice through a parent loop is listed only once.
pub fn directory_tree(
    db: &DesktopDb,
    user_id: &str,
    parent_id: Option<i64>,
) -> Result<Vec<FileTreeNode>> {
    let mut visited = HashSet::new();
    tree_level(db, user_id, parent_id, &mut visited)
}

fn tree_level(
    db: &DesktopDb,
    user_id: &str,
    parent_id: Option<i64>,
    visited: &mut HashSet<i64>,
) -> Result<Vec<FileTreeNode>> {
    let mut nodes = Vec::new();
    for file in db.list_files(user_id, parent_id)? {
        if !visited.insert(file.id) {
            warn!(user_id, id = file.id, "Parent loop in file tree");
            continue;
        }
        let children = if file.is_directory() {
            Some(tree_level(db, user_id, Some(file.id), visited)?)
        } else {
            None
        };
        nodes.push(FileTreeNode {
            id: file.id,
            name: file.name,
            path: file.path,
            kind: file.kind,
            size: file.size,
            content: file.content,
            children,
        });
    }
    Ok(nodes)
}

/// Create an entry under `parent_path`. The parent link is set only when a
/// directory with that exact path exists.
pub fn create_file(
    db: &DesktopDb,
    user_id: &str,
    name: &str,
    parent_path: &str,
    kind: FileKind,
    content: Option<&str>,
) -> Result<FileNode> {
    if name.is_empty() || name.contains('/') {
        return Err(DesktopError::InvalidValue {
            field: "name",
            value: name.to_string(),
        }
        .into());
    }
    let path = join_path(parent_path, name);
    let parent_id = resolve_parent(db, user_id, parent_path)?;
    let new_file = match kind {
        FileKind::Directory => NewFile::directory(name, &path, parent_id),
        FileKind::File => NewFile::file(name, &path, content.unwrap_or_default(), parent_id),
    };
    db.create_file(user_id, &new_file)
}

/// Replace a file's content and recompute its size.
pub fn update_content(db: &DesktopDb, user_id: &str, id: i64, content: &str) -> Result<FileNode> {
    db.update_file(
        id,
        user_id,
        &FilePatch {
            content: Some(content.to_string()),
            size: Some(content.len() as i64),
            ..Default::default()
        },
    )
}

/// Whether making `new_parent_id` the parent of `id` would close a loop,
/// i.e. `new_parent_id` is `id` itself or one of its descendants.
fn creates_parent_loop(db: &DesktopDb, user_id: &str, id: i64, new_parent_id: i64) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut current = Some(new_parent_id);
    while let Some(ancestor) = current {
        if ancestor == id {
            return Ok(true);
        }
        if !seen.insert(ancestor) {
            // Already looping above the target; `id` is not on it.
            return Ok(false);
        }
        current = db.get_file(ancestor, user_id)?.and_then(|f| f.parent_id);
    }
    Ok(false)
}

/// Apply a partial update. Content-only patches go through
/// [`update_content`]; a new parent that would make the row its own
/// ancestor is rejected.
pub fn update_file(db: &DesktopDb, user_id: &str, id: i64, mut patch: FilePatch) -> Result<FileNode> {
    if let Some(Some(parent_id)) = patch.parent_id {
        if creates_parent_loop(db, user_id, id, parent_id)? {
            return Err(DesktopError::BadRequest(format!(
                "Cannot make file {} a child of itself",
                id
            ))
            .into());
        }
    }

    let content_only = FilePatch {
        content: patch.content.clone(),
        ..Default::default()
    };
    if patch.content.is_some() && patch == content_only {
        let content = patch.content.unwrap_or_default();
        return update_content(db, user_id, id, &content);
    }

    if patch.size.is_none() {
        patch.size = patch.content.as_ref().map(|c| c.len() as i64);
    }
    db.update_file(id, user_id, &patch)
}

/// Delete a row and, for directories, its whole subtree (children first).
pub fn delete_recursive(db: &DesktopDb, user_id: &str, id: i64) -> Result<()> {
    let file = db
        .get_file(id, user_id)?
        .ok_or(DesktopError::FileNotFound { id })?;

    let mut visited = HashSet::new();
    delete_subtree(db, user_id, &file, &mut visited)?;
    debug!(user_id, id, path = %file.path, "Deleted file");
    Ok(())
}

fn delete_subtree(
    db: &DesktopDb,
    user_id: &str,
    file: &FileNode,
    visited: &mut HashSet<i64>,
) -> Result<()> {
    if !visited.insert(file.id) {
        return Ok(());
    }
    if file.is_directory() {
        for child in db.list_files(user_id, Some(file.id))? {
            delete_subtree(db, user_id, &child, visited)?;
        }
    }
    db.delete_file(file.id, user_id)?;
    Ok(())
}

/// Re-parent an entry under `new_parent_path`, rewriting the paths of every
/// descendant when the entry is a directory.
pub fn move_file(db: &DesktopDb, user_id: &str, id: i64, new_parent_path: &str) -> Result<FileNode> {
    let file = db
        .get_file(id, user_id)?
        .ok_or(DesktopError::FileNotFound { id })?;

    let target = new_parent_path.trim_end_matches('/');
    if file.is_directory() && (target == file.path || target.starts_with(&format!("{}/", file.path)))
    {
        return Err(DesktopError::BadRequest(format!(
            "Cannot move {} into itself",
            file.path
        ))
        .into());
    }

    let new_parent_id = resolve_parent(db, user_id, new_parent_path)?;
    if let Some(parent_id) = new_parent_id {
        if creates_parent_loop(db, user_id, id, parent_id)? {
            return Err(DesktopError::BadRequest(format!(
                "Cannot move {} into itself",
                file.path
            ))
            .into());
        }
    }
    let new_path = join_path(new_parent_path, &file.name);

    if file.is_directory() {
        let mut visited = HashSet::from([file.id]);
        rewrite_descendant_paths(db, user_id, file.id, &file.path, &new_path, &mut visited)?;
    }

    db.update_file(
        id,
        user_id,
        &FilePatch {
            path: Some(new_path),
            parent_id: Some(new_parent_id),
            ..Default::default()
        },
    )
}

fn rewrite_descendant_paths(
    db: &DesktopDb,
    user_id: &str,
    dir_id: i64,
    old_prefix: &str,
    new_prefix: &str,
    visited: &mut HashSet<i64>,
) -> Result<()> {
    for child in db.list_files(user_id, Some(dir_id))? {
        if !visited.insert(child.id) {
            continue;
        }
        let suffix = child.path.strip_prefix(old_prefix).unwrap_or(&child.path);
        let new_path = format!("{}{}", new_prefix, suffix);
        if child.is_directory() {
            rewrite_descendant_paths(db, user_id, child.id, old_prefix, new_prefix, visited)?;
        }
        db.update_file(
            child.id,
            user_id,
            &FilePatch {
                path: Some(new_path),
                ..Default::default()
            },
        )?;
    }
    Ok(())
}

pub fn search(db: &DesktopDb, user_id: &str, query: &str) -> Result<Vec<FileNode>> {
    db.search_files(user_id, query)
}

pub fn stats(db: &DesktopDb, user_id: &str) -> Result<FileStats> {
    let all = db.list_all_files(user_id)?;
    let (mut files, directories): (Vec<FileNode>, Vec<FileNode>) =
        all.into_iter().partition(|f| !f.is_directory());

    let total_size = files.iter().map(|f| f.size).sum();
    let total_files = files.len();
    files.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
    files.truncate(RECENT_FILES_LIMIT);

    Ok(FileStats {
        total_files,
        total_directories: directories.len(),
        total_size,
        recent_files: files,
    })
}
