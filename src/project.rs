//! Project file loading and generation.
//!
//! A diannex project is a JSON file describing the sources to compile and
//! the output options. Every field is optional; missing fields fall back to
//! the defaults below, and the project name falls back to the file stem.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Output and behavior options for a compilation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectOptions {
    /// Message to print when compilation finishes.
    pub compile_finish_message: String,

    /// Source files to compile, in order.
    pub files: Vec<String>,

    /// Whether `${…}` interpolation inside string literals is enabled.
    pub interpolation_enabled: bool,

    /// Directory to output the binary (public translation files land here
    /// as well).
    pub binary_output_dir: String,

    /// Filename of the binary; the project name when empty.
    pub binary_name: String,

    /// Whether to output a private translation file.
    pub translation_private: bool,

    /// Filename of the private translation file; the binary name when empty.
    pub translation_private_name: String,

    /// Directory to output private translation files.
    pub translation_private_out_dir: String,

    /// Whether to output a public translation file.
    pub translation_public: bool,

    /// Filename of the public translation file; the binary name when empty.
    pub translation_public_name: String,

    /// Whether to compress the binary payload with zlib.
    pub compression: bool,

    /// Whether to assign fresh localization ids and write them back into
    /// the source files.
    pub add_string_ids: bool,

    /// Whether to emit `&XXXXXXXX` id suffixes in private translation files.
    pub use_string_ids: bool,

    /// Predefined macros, each `NAME` or `NAME=VALUE`.
    pub macros: Vec<String>,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        ProjectOptions {
            compile_finish_message: String::new(),
            files: vec!["main.dx".to_string()],
            interpolation_enabled: true,
            binary_output_dir: "./out".to_string(),
            binary_name: String::new(),
            translation_private: false,
            translation_private_name: String::new(),
            translation_private_out_dir: "./translations".to_string(),
            translation_public: false,
            translation_public_name: String::new(),
            compression: true,
            add_string_ids: false,
            use_string_ids: false,
            macros: Vec::new(),
        }
    }
}

impl ProjectOptions {
    /// Splits the `NAME` / `NAME=VALUE` macro strings into a lookup table.
    pub fn macro_table(&self) -> HashMap<String, String> {
        let mut table = HashMap::new();
        for entry in &self.macros {
            match entry.find('=') {
                Some(pos) => {
                    table.insert(entry[..pos].to_string(), entry[pos + 1..].to_string());
                }
                None => {
                    table.insert(entry.clone(), String::new());
                }
            }
        }
        table
    }
}

/// A loaded project file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectFormat {
    /// Name of the project; defaults to the project file's stem.
    pub name: String,

    /// Authors/contributors.
    pub authors: Vec<String>,

    pub options: ProjectOptions,
}

impl ProjectFormat {
    /// A project with default options and the given name.
    pub fn named(name: impl Into<String>) -> Self {
        ProjectFormat {
            name: name.into(),
            authors: Vec::new(),
            options: ProjectOptions::default(),
        }
    }
}

/// Failure to load or write a project file.
#[derive(Debug)]
pub struct ProjectError {
    pub message: String,
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProjectError {}

/// Loads a project from a JSON file, defaulting the name to the file stem.
pub fn load_project(path: &Path) -> Result<ProjectFormat, ProjectError> {
    let text = fs::read_to_string(path).map_err(|e| ProjectError {
        message: format!("Failed to load project file: {}", e),
    })?;
    let mut project: ProjectFormat = serde_json::from_str(&text).map_err(|e| ProjectError {
        message: format!("Failed to parse project file: {}", e),
    })?;
    if project.name.is_empty() {
        project.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(project)
}

/// Writes `NAME.json` with default options into the current directory.
pub fn generate_project(name: &str) -> Result<(), ProjectError> {
    let project = ProjectFormat::named(name);
    let text = serde_json::to_string_pretty(&project).map_err(|e| ProjectError {
        message: format!("Failed to serialize project: {}", e),
    })?;
    let path = format!("{}.json", name);
    fs::write(&path, text).map_err(|e| ProjectError {
        message: format!("Failed to write project file at '{}': {}", path, e),
    })
}
