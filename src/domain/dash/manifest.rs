//! Post-processing of the MPD written by the packager.
//!
//! The packager writes segment URLs relative to the manifest file. Players
//! resolve them against the manifest's own URL, which is not where this
//! service serves segments, so a top-level `BaseURL` is forced to the
//! segment route of the owning video.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest has no MPD root element")]
    MissingRoot,
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn root_open_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(?:[A-Za-z_][\w.-]*:)?MPD\b[^>]*>").expect("valid regex"))
}

fn period_open_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(?:[A-Za-z_][\w.-]*:)?Period\b").expect("valid regex"))
}

fn root_close_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</(?:[A-Za-z_][\w.-]*:)?MPD\s*>").expect("valid regex"))
}

fn base_url_element() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)[ \t]*<(?:[A-Za-z_][\w.-]*:)?BaseURL\b[^>]*?(?:/>|>.*?</(?:[A-Za-z_][\w.-]*:)?BaseURL\s*>)[ \t]*\r?\n?",
        )
        .expect("valid regex")
    })
}

/// Route prefix under which the segments of `video_id` are served. Ends with
/// a slash so relative segment names resolve beneath it.
pub fn segment_base_url(api_prefix: &str, video_id: &str) -> String {
    format!("{}/videos/{}/segments/", api_prefix.trim_end_matches('/'), video_id)
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Set the MPD-level `BaseURL` to `base_url`. Existing top-level `BaseURL`
/// elements are replaced by a single one; `BaseURL`s inside periods,
/// adaptation sets or representations are left alone.
pub fn rewrite_base_url(document: &str, base_url: &str) -> Result<String, ManifestError> {
    let root = root_open_tag()
        .find(document)
        .ok_or(ManifestError::MissingRoot)?;
    if root.as_str().ends_with("/>") {
        return Err(ManifestError::MissingRoot);
    }

    let body_start = root.end();
    let rest = &document[body_start..];
    // Top-level BaseURLs precede the first Period.
    let head_len = period_open_tag()
        .find(rest)
        .or_else(|| root_close_tag().find(rest))
        .map(|m| m.start())
        .unwrap_or(rest.len());
    let (head, tail) = rest.split_at(head_len);

    let head = base_url_element().replace_all(head, "");
    let head = head.trim_end_matches([' ', '\t']);

    let indent = tail_indent(head);
    let element = format!("<BaseURL>{}</BaseURL>", escape_xml(base_url));

    let mut out = String::with_capacity(document.len() + element.len() + 8);
    out.push_str(&document[..body_start]);
    out.push_str(head);
    if !head.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&indent);
    out.push_str(&element);
    out.push('\n');
    out.push_str(&indent);
    out.push_str(tail.trim_start_matches([' ', '\t']));
    Ok(out)
}

/// Indentation used by the root's children, guessed from the first
/// indented line of the head.
fn tail_indent(head: &str) -> String {
    head.lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| {
            line.chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect()
        })
        .unwrap_or_else(|| "\t".to_string())
}

/// Rewrite the manifest at `path` in place. The new document is written to
/// a sibling file and renamed over the original.
pub async fn rewrite_base_url_file(path: &Path, base_url: &str) -> Result<(), ManifestError> {
    let document = fs::read_to_string(path).await?;
    let rewritten = rewrite_base_url(&document, base_url)?;

    let staging = path.with_extension("mpd.tmp");
    fs::write(&staging, rewritten).await?;
    if let Err(e) = fs::rename(&staging, path).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    Ok(())
}
