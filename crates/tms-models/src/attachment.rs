//! Inline attachment references.
//!
//! Text fields reference attachments of their own entity as `<<<file name>>>`.
//! Exporters rewrite vendor image links into this form, the importer rewrites
//! it into the target system's markup.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `<<<name>>>` placeholders; group 1 is the file name.
pub static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<<([^<>]+?)>>>").expect("Invalid regex"));

/// Renders the placeholder for an attachment file name.
pub fn placeholder(file_name: &str) -> String {
    format!("<<<{file_name}>>>")
}

/// Lists the file names referenced by placeholders in `text`, in order, without duplicates.
pub fn placeholders_in(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in PLACEHOLDER_REGEX.captures_iter(text) {
        let name = cap[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replaces every placeholder using `render`; unknown names are left untouched
/// when `render` returns `None`.
pub fn replace_placeholders<F>(text: &str, mut render: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    PLACEHOLDER_REGEX
        .replace_all(text, |cap: &regex::Captures<'_>| {
            render(&cap[1]).unwrap_or_else(|| cap[0].to_string())
        })
        .into_owned()
}
