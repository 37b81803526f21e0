//! Tera rendering engine: [`Document`] enum and [`Renderer`].
//!
//! | Document          | Template                     |
//! |-------------------|------------------------------|
//! | Artifact          | `spammers.txt.tera`          |
//! | CommitMessage     | `commit_message.tera`        |
//! | PullRequestTitle  | `pull_request_title.tera`    |
//! | PullRequestBody   | `pull_request_body.md.tera`  |
//!
//! A user template directory may override any of them by file name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tera::Tera;

use spamsub_core::Address;

use crate::context::PublicationContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("spammers.txt.tera", include_str!("templates/spammers.txt.tera")),
    ("commit_message.tera", include_str!("templates/commit_message.tera")),
    ("pull_request_title.tera", include_str!("templates/pull_request_title.tera")),
    (
        "pull_request_body.md.tera",
        include_str!("templates/pull_request_body.md.tera"),
    ),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Every text the publication cycle produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Document {
    /// The tracked spammer list, one address per line.
    Artifact,
    CommitMessage,
    PullRequestTitle,
    PullRequestBody,
}

impl Document {
    /// All documents in a stable order.
    pub fn all() -> &'static [Document] {
        &[
            Document::Artifact,
            Document::CommitMessage,
            Document::PullRequestTitle,
            Document::PullRequestBody,
        ]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            Document::Artifact         => "spammers.txt.tera",
            Document::CommitMessage    => "commit_message.tera",
            Document::PullRequestTitle => "pull_request_title.tera",
            Document::PullRequestBody  => "pull_request_body.md.tera",
        }
    }

    /// Single-line documents are trimmed after rendering.
    fn is_single_line(&self) -> bool {
        matches!(self, Document::CommitMessage | Document::PullRequestTitle)
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that override embedded defaults.
/// Template names are normalised to lowercase.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Construct a new [`TemplateEngine`], loading embedded templates plus any
    /// overrides found in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    pub fn render(
        &self,
        document: Document,
        ctx: &PublicationContext,
    ) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let rendered = self.tera.render(document.template_name(), &tera_ctx)?;
        if document.is_single_line() {
            return Ok(rendered.trim().to_string());
        }
        Ok(rendered.replace("\r\n", "\n"))
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renderer for every [`Document`]. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Construct a new [`Renderer`] with embedded templates.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(None)? })
    }

    /// Construct a [`Renderer`] whose templates may be overridden from `dir`.
    pub fn with_template_dir(dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(dir)? })
    }

    pub fn render(
        &self,
        document: Document,
        ctx: &PublicationContext,
    ) -> Result<String, RenderError> {
        self.engine.render(document, ctx)
    }

    /// Render the artifact for `addresses` (any order) as of `now`.
    pub fn render_artifact(
        &self,
        addresses: &[Address],
        now: DateTime<Utc>,
    ) -> Result<String, RenderError> {
        let ctx = PublicationContext::new(addresses, &[], now);
        self.render(Document::Artifact, &ctx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn addrs(raw: &[&str]) -> Vec<Address> {
        raw.iter().map(|s| Address::normalize(s).unwrap()).collect()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn every_document_renders() {
        let renderer = Renderer::new().expect("renderer");
        let ctx = PublicationContext::new(&addrs(&["a.com"]), &[], at());
        for doc in Document::all() {
            renderer.render(*doc, &ctx).expect("render");
        }
    }

    #[test]
    fn artifact_is_sorted_and_newline_terminated() {
        let renderer = Renderer::new().expect("renderer");
        let out = renderer
            .render_artifact(&addrs(&["zeta.io", "Alpha.com", "mid.org"]), at())
            .expect("render");
        assert_eq!(out, "@alpha.com\n@mid.org\n@zeta.io\n");
    }

    #[test]
    fn empty_artifact_is_empty() {
        let renderer = Renderer::new().expect("renderer");
        assert_eq!(renderer.render_artifact(&[], at()).expect("render"), "");
    }

    #[test]
    fn single_line_documents_are_trimmed() {
        let renderer = Renderer::new().expect("renderer");
        let ctx = PublicationContext::new(&[], &[], at());
        assert_eq!(
            renderer.render(Document::CommitMessage, &ctx).unwrap(),
            "Updating Spammers on Sat, 09 Mar 2024 14:05:07"
        );
        assert_eq!(
            renderer.render(Document::PullRequestTitle, &ctx).unwrap(),
            "Updated Spammers on Sat, 09 Mar 2024 14:05:07"
        );
    }
}
