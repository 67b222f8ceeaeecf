//! Which workspace files count as artifacts, and their content types.

use std::collections::BTreeSet;

use camino::Utf8Path;

/// Extensions (lowercase, without the dot) that mark a file as an artifact.
pub const ARTIFACT_EXTENSIONS: &[&str] = &[
    "txt", "csv", "json", "png", "jpg", "jpeg", "pdf", "svg", "xlsx", "html",
];

/// Case-sensitive basename fragments that mark a file as an artifact.
pub const ARTIFACT_NAME_HINTS: &[&str] = &["output", "report", "chart", "result"];

/// Content type used when the extension is unknown.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("pdf", "application/pdf"),
    ("svg", "image/svg+xml"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("html", "text/html"),
];

const EXCLUDED_NAMES: &[&str] = &["main.py", "requirements.txt"];

/// Why a workspace file was not captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The entrypoint or dependency manifest.
    Input,
    /// Name starts with a dot.
    Hidden,
    /// A file with this basename was already captured.
    Duplicate,
    /// Neither the extension nor the name looks like output.
    NotAnArtifact,
}

/// Decision for one workspace file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Capture the file with this content type.
    Capture {
        /// MIME type for the file record.
        content_type: &'static str,
    },
    /// Leave the file in the workspace.
    Skip(SkipReason),
}

/// Classify a workspace file by `basename`, given the basenames already
/// captured in this run.
#[must_use]
pub fn classify(basename: &str, captured: &BTreeSet<String>) -> Verdict {
    if EXCLUDED_NAMES.contains(&basename) {
        return Verdict::Skip(SkipReason::Input);
    }
    if basename.starts_with('.') {
        return Verdict::Skip(SkipReason::Hidden);
    }
    if captured.contains(basename) {
        return Verdict::Skip(SkipReason::Duplicate);
    }

    let extension = lowercase_extension(basename);
    let known_extension = extension
        .as_deref()
        .is_some_and(|ext| ARTIFACT_EXTENSIONS.contains(&ext));
    let hinted = ARTIFACT_NAME_HINTS
        .iter()
        .any(|hint| basename.contains(hint));

    if known_extension || hinted {
        Verdict::Capture {
            content_type: content_type_for(basename),
        }
    } else {
        Verdict::Skip(SkipReason::NotAnArtifact)
    }
}

/// MIME type for `basename` from its extension.
#[must_use]
pub fn content_type_for(basename: &str) -> &'static str {
    lowercase_extension(basename)
        .and_then(|ext| {
            CONTENT_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, content_type)| *content_type)
        })
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

fn lowercase_extension(basename: &str) -> Option<String> {
    Utf8Path::new(basename)
        .extension()
        .map(str::to_ascii_lowercase)
}
