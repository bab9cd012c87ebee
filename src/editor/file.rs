use serde::Serialize;

/// A file opened in the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditorFile {
    pub name: String,
    pub path: String,
    pub content: String,
    pub language: &'static str,
}

impl EditorFile {
    pub fn new(path: &str, content: String) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let language = language_for(&name);
        Self {
            name,
            path: path.to_string(),
            content,
            language,
        }
    }
}

/// Syntax mode for a file name, by extension.
pub fn language_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "json" => "json",
        "css" => "css",
        "html" => "html",
        "md" => "markdown",
        _ => "plaintext",
    }
}
