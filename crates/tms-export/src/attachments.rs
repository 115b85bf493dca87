//! Attachment re-linking.
//!
//! Vendors embed attachments in rich text as URLs or ids. Once a blob is
//! stored, the vendor reference is replaced by a `<<<file name>>>`
//! placeholder pointing at the stored file.

use regex::Regex;
use std::collections::HashMap;
use tms_models::{placeholder, Step};

/// Map from vendor attachment reference to stored file name.
#[derive(Debug, Default, Clone)]
pub struct AttachmentLinker {
    stored: HashMap<String, String>,
    ignore_case: bool,
}

impl AttachmentLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A linker whose references match regardless of ASCII case (GUIDs).
    pub fn case_insensitive() -> Self {
        Self {
            ignore_case: true,
            ..Self::default()
        }
    }

    fn key(&self, reference: &str) -> String {
        if self.ignore_case {
            reference.to_ascii_lowercase()
        } else {
            reference.to_string()
        }
    }

    pub fn len(&self) -> usize {
        self.stored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    /// Remember that `reference` was stored as `stored_name`.
    pub fn insert(&mut self, reference: impl Into<String>, stored_name: impl Into<String>) {
        let key = self.key(&reference.into());
        self.stored.insert(key, stored_name.into());
    }

    pub fn get(&self, reference: &str) -> Option<&str> {
        self.stored.get(&self.key(reference)).map(String::as_str)
    }

    /// Replace every match of `pattern` whose first capture group is a known
    /// reference. Unknown references are left as they are. Returns the new
    /// text and the stored names it now points at.
    pub fn relink(&self, text: &str, pattern: &Regex) -> (String, Vec<String>) {
        let mut used: Vec<String> = Vec::new();
        let out = pattern.replace_all(text, |cap: &regex::Captures<'_>| {
            let reference = cap.get(1).map_or("", |m| m.as_str());
            match self.get(reference) {
                Some(name) => {
                    if !used.iter().any(|u| u == name) {
                        used.push(name.to_string());
                    }
                    placeholder(name)
                }
                None => cap[0].to_string(),
            }
        });
        (out.into_owned(), used)
    }

    /// Relink the three text fields of a step and record the attachments
    /// each field now references.
    pub fn relink_step(&self, step: &mut Step, pattern: &Regex) {
        let fields = [
            (&mut step.action, &mut step.action_attachments),
            (&mut step.expected, &mut step.expected_attachments),
            (&mut step.test_data, &mut step.test_data_attachments),
        ];
        for (text, list) in fields {
            let (relinked, used) = self.relink(text, pattern);
            *text = relinked;
            for name in used {
                if !list.contains(&name) {
                    list.push(name);
                }
            }
        }
    }
}

/// Collect the first capture group of every match, without duplicates.
pub fn find_references(text: &str, pattern: &Regex) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for cap in pattern.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            let reference = m.as_str().to_string();
            if !found.contains(&reference) {
                found.push(reference);
            }
        }
    }
    found
}

/// Point a step at `new` wherever it referenced attachment `old`.
pub fn rename_attachment(step: &mut Step, old: &str, new: &str) {
    if old == new {
        return;
    }
    let (from, to) = (placeholder(old), placeholder(new));
    for text in [&mut step.action, &mut step.expected, &mut step.test_data] {
        *text = text.replace(&from, &to);
    }
    for list in [
        &mut step.action_attachments,
        &mut step.expected_attachments,
        &mut step.test_data_attachments,
    ] {
        for name in list.iter_mut().filter(|n| n.as_str() == old) {
            *name = new.to_string();
        }
    }
}

/// Remove every reference a step holds to attachment `name`.
pub fn drop_attachment(step: &mut Step, name: &str) {
    let marker = placeholder(name);
    for text in [&mut step.action, &mut step.expected, &mut step.test_data] {
        *text = text.replace(&marker, "");
    }
    for list in [
        &mut step.action_attachments,
        &mut step.expected_attachments,
        &mut step.test_data_attachments,
    ] {
        list.retain(|n| n != name);
    }
}
