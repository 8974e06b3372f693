//! Window-state manager and application catalog.
//!
//! `Desktop` is plain in-memory state: it tracks open windows, their geometry
//! and stacking order. At most one window per kind is open at a time.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// First z-index handed out; every open/focus takes the next one.
pub const BASE_Z_INDEX: u32 = 1000;

const SPAWN_OFFSET: f64 = 50.0;
const SPAWN_JITTER: f64 = 100.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WindowKind {
    FileManager,
    Terminal,
    AiAssistant,
    SystemMonitor,
    CodeEditor,
    AppLauncher,
    UserAuth,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileManager => "file-manager",
            Self::Terminal => "terminal",
            Self::AiAssistant => "ai-assistant",
            Self::SystemMonitor => "system-monitor",
            Self::CodeEditor => "code-editor",
            Self::AppLauncher => "app-launcher",
            Self::UserAuth => "user-auth",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::FileManager => "AI File Manager",
            Self::Terminal => "AI Terminal",
            Self::AiAssistant => "AI Assistant",
            Self::SystemMonitor => "System Monitor",
            Self::CodeEditor => "AI Code Editor",
            Self::AppLauncher => "Applications",
            Self::UserAuth => "User Authentication",
        }
    }

    pub fn default_size(&self) -> Size {
        let (width, height) = match self {
            Self::FileManager | Self::Terminal | Self::CodeEditor => (384.0, 320.0),
            Self::AiAssistant => (320.0, 384.0),
            Self::SystemMonitor => (320.0, 256.0),
            Self::AppLauncher => (600.0, 400.0),
            Self::UserAuth => (384.0, 300.0),
        };
        Size { width, height }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WindowKind,
    pub title: String,
    pub is_open: bool,
    pub is_minimized: bool,
    pub is_maximized: bool,
    pub position: Position,
    pub size: Size,
    pub z_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Fields merged by `Desktop::update`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowPatch {
    pub title: Option<String>,
    pub position: Option<Position>,
    pub size: Option<Size>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Desktop {
    windows: Vec<Window>,
    next_z_index: u32,
    #[serde(skip)]
    next_seq: u64,
}

impl Default for Desktop {
    fn default() -> Self {
        Self::new()
    }
}

impl Desktop {
    pub fn new() -> Self {
        Self {
            windows: Vec::new(),
            next_z_index: BASE_Z_INDEX,
            next_seq: 0,
        }
    }

    /// The five windows shown on first login, stacked in order.
    pub fn with_default_layout() -> Self {
        let layout = [
            (WindowKind::FileManager, 32.0, 32.0),
            (WindowKind::Terminal, 450.0, 32.0),
            (WindowKind::AiAssistant, 32.0, 400.0),
            (WindowKind::SystemMonitor, 400.0, 32.0),
            (WindowKind::CodeEditor, 450.0, 400.0),
        ];
        let mut desktop = Self::new();
        for (kind, x, y) in layout {
            desktop.push_window(kind, Position { x, y }, None);
        }
        desktop
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn get(&self, id: &str) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn next_z_index(&self) -> u32 {
        self.next_z_index
    }

    fn take_z_index(&mut self) -> u32 {
        let z = self.next_z_index;
        self.next_z_index += 1;
        z
    }

    fn push_window(
        &mut self,
        kind: WindowKind,
        position: Position,
        data: Option<serde_json::Value>,
    ) -> String {
        let id = format!("{}-{}", kind, self.next_seq);
        self.next_seq += 1;
        let z_index = self.take_z_index();
        self.windows.push(Window {
            id: id.clone(),
            kind,
            title: kind.title().to_string(),
            is_open: true,
            is_minimized: false,
            is_maximized: false,
            position,
            size: kind.default_size(),
            z_index,
            data,
        });
        id
    }

    /// Open a window of `kind`, or focus the one already open. Returns its id.
    pub fn open(&mut self, kind: WindowKind, data: Option<serde_json::Value>) -> String {
        if let Some(existing) = self.windows.iter().find(|w| w.kind == kind && w.is_open) {
            let id = existing.id.clone();
            self.focus(&id);
            return id;
        }
        let mut rng = rand::thread_rng();
        let position = Position {
            x: SPAWN_OFFSET + rng.gen_range(0.0..SPAWN_JITTER),
            y: SPAWN_OFFSET + rng.gen_range(0.0..SPAWN_JITTER),
        };
        self.push_window(kind, position, data)
    }

    pub fn close(&mut self, id: &str) -> bool {
        let before = self.windows.len();
        self.windows.retain(|w| w.id != id);
        self.windows.len() != before
    }

    pub fn minimize(&mut self, id: &str) -> bool {
        self.with_window(id, |w| w.is_minimized = true)
    }

    /// Toggle maximized.
    pub fn maximize(&mut self, id: &str) -> bool {
        self.with_window(id, |w| w.is_maximized = !w.is_maximized)
    }

    /// Raise to the top and restore if minimized.
    pub fn focus(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        let z = self.take_z_index();
        self.with_window(id, |w| {
            w.z_index = z;
            w.is_minimized = false;
        })
    }

    pub fn update(&mut self, id: &str, patch: WindowPatch) -> bool {
        self.with_window(id, |w| {
            if let Some(title) = patch.title {
                w.title = title;
            }
            if let Some(position) = patch.position {
                w.position = position;
            }
            if let Some(size) = patch.size {
                w.size = size;
            }
            if let Some(data) = patch.data {
                w.data = Some(data);
            }
        })
    }

    /// Topmost visible window.
    pub fn focused(&self) -> Option<&Window> {
        self.windows
            .iter()
            .filter(|w| !w.is_minimized)
            .max_by_key(|w| w.z_index)
    }

    fn with_window(&mut self, id: &str, f: impl FnOnce(&mut Window)) -> bool {
        match self.windows.iter_mut().find(|w| w.id == id) {
            Some(w) => {
                f(w);
                true
            }
            None => false,
        }
    }
}

// ── App catalog ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppCategory {
    System,
    Development,
    #[serde(rename = "AI Tools")]
    AiTools,
    Productivity,
    Media,
    Security,
}

impl std::str::FromStr for AppCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "System" => Ok(Self::System),
            "Development" => Ok(Self::Development),
            "AI Tools" => Ok(Self::AiTools),
            "Productivity" => Ok(Self::Productivity),
            "Media" => Ok(Self::Media),
            "Security" => Ok(Self::Security),
            _ => Err(format!("Invalid app category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: AppCategory,
    /// Window opened on launch; `None` for apps that are listed but not
    /// launchable yet.
    pub window: Option<WindowKind>,
}

const fn app(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    category: AppCategory,
    window: Option<WindowKind>,
) -> AppInfo {
    AppInfo {
        id,
        name,
        description,
        category,
        window,
    }
}

pub const APP_CATALOG: &[AppInfo] = &[
    app("file-manager", "File Manager", "AI-powered file organization and search", AppCategory::System, Some(WindowKind::FileManager)),
    app("terminal", "AI Terminal", "Natural language command interface", AppCategory::System, Some(WindowKind::Terminal)),
    app("ai-assistant", "AI Assistant", "Personal AI helper for system tasks", AppCategory::AiTools, Some(WindowKind::AiAssistant)),
    app("system-monitor", "System Monitor", "Real-time performance monitoring", AppCategory::System, Some(WindowKind::SystemMonitor)),
    app("code-editor", "Code Editor", "AI-enhanced code development", AppCategory::Development, Some(WindowKind::CodeEditor)),
    app("settings", "Settings", "System configuration and preferences", AppCategory::System, None),
    app("browser", "Web Browser", "Browse the internet securely", AppCategory::Productivity, None),
    app("calculator", "Calculator", "Advanced mathematical calculations", AppCategory::Productivity, None),
    app("calendar", "Calendar", "Schedule and task management", AppCategory::Productivity, None),
    app("mail", "Mail", "Email client with AI features", AppCategory::Productivity, None),
    app("music", "Music Player", "AI-curated music experience", AppCategory::Media, None),
    app("image-viewer", "Image Viewer", "AI-powered image analysis", AppCategory::Media, None),
    app("text-editor", "Text Editor", "Simple text editing with AI assistance", AppCategory::Productivity, None),
    app("security", "Security Center", "AI-powered security monitoring", AppCategory::Security, None),
    app("neural-trainer", "Neural Trainer", "Train and deploy AI models", AppCategory::AiTools, None),
    app("user-manager", "User Manager", "Manage user permissions and access", AppCategory::System, None),
];

/// Filter the catalog by category and a case-insensitive name/description query.
pub fn search_apps(query: Option<&str>, category: Option<AppCategory>) -> Vec<&'static AppInfo> {
    let query = query.map(str::to_lowercase).filter(|q| !q.is_empty());
    APP_CATALOG
        .iter()
        .filter(|a| category.is_none_or(|c| a.category == c))
        .filter(|a| match &query {
            Some(q) => {
                a.name.to_lowercase().contains(q) || a.description.to_lowercase().contains(q)
            }
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let desktop = Desktop::with_default_layout();
        let windows = desktop.windows();
        assert_eq!(windows.len(), 5);
        let z: Vec<u32> = windows.iter().map(|w| w.z_index).collect();
        assert_eq!(z, vec![1000, 1001, 1002, 1003, 1004]);
        assert_eq!(desktop.next_z_index(), 1005);
        assert_eq!(windows[1].kind, WindowKind::Terminal);
        assert_eq!(windows[1].position, Position { x: 450.0, y: 32.0 });
        assert_eq!(windows[2].size, Size { width: 320.0, height: 384.0 });
        assert!(windows.iter().all(|w| w.is_open && !w.is_minimized));
    }

    #[test]
    fn test_open_new_window_spawns_in_range() {
        let mut desktop = Desktop::new();
        let id = desktop.open(WindowKind::AppLauncher, None);
        let w = desktop.get(&id).expect("window");
        assert_eq!(w.title, "Applications");
        assert_eq!(w.size, Size { width: 600.0, height: 400.0 });
        assert_eq!(w.z_index, BASE_Z_INDEX);
        assert!((50.0..150.0).contains(&w.position.x));
        assert!((50.0..150.0).contains(&w.position.y));
    }

    #[test]
    fn test_open_existing_kind_focuses_instead() {
        let mut desktop = Desktop::with_default_layout();
        let terminal_id = desktop.windows()[1].id.clone();
        desktop.minimize(&terminal_id);

        let id = desktop.open(WindowKind::Terminal, None);
        assert_eq!(id, terminal_id);
        assert_eq!(desktop.windows().len(), 5);
        let w = desktop.get(&id).expect("terminal");
        assert_eq!(w.z_index, 1005);
        assert!(!w.is_minimized);
        assert_eq!(desktop.focused().map(|w| w.id.as_str()), Some(id.as_str()));
    }

    #[test]
    fn test_close_then_reopen_creates_new_window() {
        let mut desktop = Desktop::with_default_layout();
        let old = desktop.windows()[0].id.clone();
        assert!(desktop.close(&old));
        assert!(!desktop.close(&old));
        assert_eq!(desktop.windows().len(), 4);

        let new = desktop.open(WindowKind::FileManager, Some(serde_json::json!({"path": "/home"})));
        assert_ne!(new, old);
        let w = desktop.get(&new).expect("file manager");
        assert_eq!(w.data, Some(serde_json::json!({"path": "/home"})));
    }

    #[test]
    fn test_maximize_toggles() {
        let mut desktop = Desktop::with_default_layout();
        let id = desktop.windows()[0].id.clone();
        desktop.maximize(&id);
        assert!(desktop.get(&id).map(|w| w.is_maximized).unwrap_or(false));
        desktop.maximize(&id);
        assert!(!desktop.get(&id).map(|w| w.is_maximized).unwrap_or(true));
    }

    #[test]
    fn test_focus_is_monotonic() {
        let mut desktop = Desktop::with_default_layout();
        let a = desktop.windows()[0].id.clone();
        let b = desktop.windows()[1].id.clone();
        desktop.focus(&a);
        desktop.focus(&b);
        desktop.focus(&a);
        assert_eq!(desktop.get(&a).map(|w| w.z_index), Some(1007));
        assert_eq!(desktop.get(&b).map(|w| w.z_index), Some(1006));
        assert!(!desktop.focus("missing"));
        assert_eq!(desktop.next_z_index(), 1008);
    }

    #[test]
    fn test_update_merges_fields() {
        let mut desktop = Desktop::with_default_layout();
        let id = desktop.windows()[4].id.clone();
        desktop.update(
            &id,
            WindowPatch {
                position: Some(Position { x: 1.0, y: 2.0 }),
                ..Default::default()
            },
        );
        let w = desktop.get(&id).expect("editor");
        assert_eq!(w.position, Position { x: 1.0, y: 2.0 });
        assert_eq!(w.title, "AI Code Editor");
        assert!(!desktop.update("missing", WindowPatch::default()));
    }

    #[test]
    fn test_window_serializes_like_client() {
        let desktop = Desktop::with_default_layout();
        let json = serde_json::to_value(&desktop.windows()[3]).unwrap();
        assert_eq!(json["type"], "system-monitor");
        assert_eq!(json["zIndex"], 1003);
        assert_eq!(json["isOpen"], true);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_search_apps() {
        assert_eq!(search_apps(None, None).len(), APP_CATALOG.len());
        let ai = search_apps(None, Some(AppCategory::AiTools));
        assert_eq!(ai.len(), 2);
        let hits = search_apps(Some("SECURE"), None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "browser");
        assert!(search_apps(Some("terminal"), Some(AppCategory::Media)).is_empty());
    }

    #[test]
    fn test_launchable_apps_match_default_kinds() {
        let launchable: Vec<_> = APP_CATALOG.iter().filter_map(|a| a.window).collect();
        assert_eq!(launchable.len(), 5);
        assert_eq!("AI Tools".parse::<AppCategory>(), Ok(AppCategory::AiTools));
    }
}
