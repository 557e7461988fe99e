//! Turns decrypted plaintext into files inside a request's sandbox.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Failed to create sandbox directory: {0}")]
    CreateSandbox(#[source] io::Error),

    #[error("Invalid script name: {0:?}")]
    InvalidName(String),

    #[error("Script {0} is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Replace every `\r\n`, then every remaining `\r`, with `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Rejoin lines that end in a backslash with the next non-blank line.
///
/// The continued line loses its trailing whitespace, blank lines in between
/// are dropped, and the joined line is consumed. Running this on its own
/// output returns the same text.
pub fn repair_line_continuations(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut fixed: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_end();
        if trimmed.ends_with('\\') {
            let mut joined = trimmed.to_string();
            i += 1;
            while i < lines.len() && lines[i].trim().is_empty() {
                i += 1;
            }
            if i < lines.len() {
                joined.push('\n');
                joined.push_str(lines[i]);
                i += 1;
            }
            fixed.push(joined);
        } else {
            fixed.push(lines[i].to_string());
            i += 1;
        }
    }
    fixed.join("\n")
}

/// Main scripts get both passes; helpers only get line-ending normalization.
pub fn prepare_main_script(text: &str) -> String {
    repair_line_continuations(&normalize_line_endings(text))
}

/// Accept only relative names built from normal components (`lib/util.py`).
pub fn validate_file_name(name: &str) -> Result<PathBuf, MaterializeError> {
    let path = Path::new(name);
    let mut components = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => components += 1,
            _ => return Err(MaterializeError::InvalidName(name.to_string())),
        }
    }
    if components == 0 {
        return Err(MaterializeError::InvalidName(name.to_string()));
    }
    Ok(path.to_path_buf())
}

/// Write `content` as UTF-8 to `dir/name`, creating nested parents.
pub fn write_script(dir: &Path, name: &str, content: &str) -> Result<PathBuf, MaterializeError> {
    let relative = validate_file_name(name)?;
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| MaterializeError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(&path, content.as_bytes()).map_err(|source| MaterializeError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
