//! Custom field to attribute mapping.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tms_models::{
    stable_id, Attribute, AttributeType, AttributeValue, CaseAttribute, EntityKind, PriorityType,
    StateType,
};
use tracing::debug;
use uuid::Uuid;

/// Maps vendor custom fields to attribute definitions and values.
///
/// Fields are registered under a vendor key (field id or system name); the
/// key feeds the stable attribute id.
pub struct AttributeMapper {
    scope: String,
    attributes: Vec<Attribute>,
    by_key: HashMap<String, usize>,
}

impl AttributeMapper {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            attributes: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Attribute> {
        self.by_key.get(key).map(|&idx| &self.attributes[idx])
    }

    /// Register a field. Registering the same key again merges its options.
    /// A name already taken by another key gets the key appended.
    pub fn register(
        &mut self,
        key: &str,
        name: &str,
        attribute_type: AttributeType,
        is_required: bool,
        options: Vec<String>,
    ) -> Uuid {
        if let Some(&idx) = self.by_key.get(key) {
            let attribute = &mut self.attributes[idx];
            for option in options {
                push_option(attribute, &option);
            }
            return attribute.id;
        }

        let mut display_name = name.trim().to_string();
        if display_name.is_empty() {
            display_name = key.to_string();
        }
        if self.attributes.iter().any(|a| a.name.eq_ignore_ascii_case(&display_name)) {
            display_name = format!("{display_name} ({key})");
        }

        let id = stable_id(EntityKind::Attribute, &self.scope, key);
        let mut attribute = Attribute::new(id, display_name, attribute_type);
        attribute.is_required = is_required;
        for option in options {
            push_option(&mut attribute, &option);
        }
        debug!(%key, name = %attribute.name, kind = %attribute_type, "Registered attribute");

        self.by_key.insert(key.to_string(), self.attributes.len());
        self.attributes.push(attribute);
        id
    }

    /// Convert a raw field value. Option values the definition does not know
    /// yet are added to it. Empty or unparseable values yield `None`.
    pub fn map_value(&mut self, key: &str, raw: &Value) -> Option<CaseAttribute> {
        let idx = *self.by_key.get(key)?;
        let attribute = &mut self.attributes[idx];

        let value = match attribute.attribute_type {
            AttributeType::Checkbox => AttributeValue::Bool(to_bool(raw)?),
            AttributeType::Datetime => AttributeValue::Text(normalize_datetime(raw)?),
            AttributeType::String | AttributeType::User => {
                let text = to_text(raw)?;
                AttributeValue::Text(text)
            }
            AttributeType::Options => {
                let first = option_strings(raw).into_iter().next()?;
                push_option(attribute, &first);
                AttributeValue::Text(first)
            }
            AttributeType::MultipleOptions => {
                let values = option_strings(raw);
                if values.is_empty() {
                    return None;
                }
                for value in &values {
                    push_option(attribute, value);
                }
                AttributeValue::List(values)
            }
        };

        Some(CaseAttribute {
            id: attribute.id,
            value,
        })
    }

    pub fn into_attributes(self) -> Vec<Attribute> {
        self.attributes
    }
}

fn push_option(attribute: &mut Attribute, option: &str) {
    let option = option.trim();
    if !option.is_empty() && !attribute.has_option(option) {
        attribute.options.push(option.to_string());
    }
}

/// Guess an attribute type from an untyped value.
pub fn infer_type(value: &Value) -> AttributeType {
    match value {
        Value::Bool(_) => AttributeType::Checkbox,
        Value::Array(_) => AttributeType::MultipleOptions,
        Value::String(s) if parse_datetime(s).is_some() => AttributeType::Datetime,
        _ => AttributeType::String,
    }
}

/// Map a vendor priority name onto the common scale.
pub fn map_priority(name: &str) -> PriorityType {
    let n = name.trim().to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| n.contains(w));

    if has(&["highest", "critical", "blocker", "urgent"]) {
        PriorityType::Highest
    } else if has(&["lowest", "trivial"]) {
        PriorityType::Lowest
    } else if has(&["high", "major"]) {
        PriorityType::High
    } else if has(&["low", "minor"]) {
        PriorityType::Low
    } else {
        PriorityType::Medium
    }
}

/// Map a vendor status name onto the common states.
///
/// Keywords match whole words only, so "Renewed" or "Unapproved" fall
/// through to the default.
pub fn map_state(name: &str) -> StateType {
    let n = name.to_lowercase();
    let words: Vec<&str> = n
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |phrases: &[&str]| {
        phrases.iter().any(|phrase| {
            let phrase: Vec<&str> = phrase.split(' ').collect();
            words.windows(phrase.len()).any(|window| window == phrase.as_slice())
        })
    };

    if has(&["not ready", "unready", "draft", "new", "design"]) {
        StateType::NotReady
    } else if has(&["needs work", "rework", "deprecated", "outdated", "review", "rejected"]) {
        StateType::NeedsWork
    } else if has(&["ready", "approved", "active", "published", "done", "final"]) {
        StateType::Ready
    } else {
        StateType::NotReady
    }
}

fn to_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn object_label(map: &serde_json::Map<String, Value>) -> Option<String> {
    ["name", "value", "displayName", "title", "label"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn to_text(raw: &Value) -> Option<String> {
    let text = match raw {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(to_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => object_label(map)?,
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn option_strings(raw: &Value) -> Vec<String> {
    let items: Vec<String> = match raw {
        Value::Array(items) => items.iter().filter_map(to_text).collect(),
        other => to_text(other).into_iter().collect(),
    };
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    None
}

fn normalize_datetime(raw: &Value) -> Option<String> {
    let parsed = match raw {
        Value::String(s) => parse_datetime(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }?;
    Some(parsed.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_is_idempotent_and_merges_options() {
        let mut mapper = AttributeMapper::new("testrail:1");
        let a = mapper.register("custom_area", "Area", AttributeType::Options, false, vec!["UI".into()]);
        let b = mapper.register("custom_area", "Area", AttributeType::Options, false, vec!["API".into(), "UI".into()]);
        assert_eq!(a, b);
        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.get("custom_area").unwrap().options, vec!["UI", "API"]);
    }

    #[test]
    fn test_duplicate_names_disambiguated() {
        let mut mapper = AttributeMapper::new("s");
        mapper.register("f1", "Team", AttributeType::String, false, vec![]);
        mapper.register("f2", "team", AttributeType::String, false, vec![]);
        assert_eq!(mapper.get("f2").unwrap().name, "team (f2)");
    }

    #[test]
    fn test_options_value_extends_definition() {
        let mut mapper = AttributeMapper::new("s");
        mapper.register("area", "Area", AttributeType::Options, false, vec!["UI".into()]);
        let value = mapper.map_value("area", &json!("Backend")).unwrap();
        assert_eq!(value.value, AttributeValue::Text("Backend".into()));
        assert_eq!(mapper.get("area").unwrap().options, vec!["UI", "Backend"]);
    }

    #[test]
    fn test_multiple_options_from_objects() {
        let mut mapper = AttributeMapper::new("s");
        mapper.register("platforms", "Platforms", AttributeType::MultipleOptions, false, vec![]);
        let value = mapper
            .map_value("platforms", &json!([{"name": "iOS"}, {"name": "Android"}, {"name": "iOS"}]))
            .unwrap();
        assert_eq!(value.value, AttributeValue::List(vec!["iOS".into(), "Android".into()]));
        assert!(mapper.map_value("platforms", &json!([])).is_none());
    }

    #[test]
    fn test_checkbox_and_datetime() {
        let mut mapper = AttributeMapper::new("s");
        mapper.register("auto", "Automated", AttributeType::Checkbox, false, vec![]);
        mapper.register("due", "Due", AttributeType::Datetime, false, vec![]);

        assert_eq!(mapper.map_value("auto", &json!("yes")).unwrap().value, AttributeValue::Bool(true));
        assert_eq!(mapper.map_value("auto", &json!(0)).unwrap().value, AttributeValue::Bool(false));
        assert!(mapper.map_value("auto", &json!("maybe")).is_none());

        assert_eq!(
            mapper.map_value("due", &json!("2024-03-01")).unwrap().value,
            AttributeValue::Text("2024-03-01T00:00:00+00:00".into())
        );
        assert!(mapper.map_value("due", &json!("soon")).is_none());
    }

    #[test]
    fn test_unknown_key_and_empty_text() {
        let mut mapper = AttributeMapper::new("s");
        mapper.register("note", "Note", AttributeType::String, false, vec![]);
        assert!(mapper.map_value("other", &json!("x")).is_none());
        assert!(mapper.map_value("note", &json!("  ")).is_none());
        assert!(mapper.map_value("note", &Value::Null).is_none());
        assert_eq!(mapper.map_value("note", &json!(3)).unwrap().value, AttributeValue::Text("3".into()));
    }

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type(&json!(true)), AttributeType::Checkbox);
        assert_eq!(infer_type(&json!(["a"])), AttributeType::MultipleOptions);
        assert_eq!(infer_type(&json!("2024-01-02")), AttributeType::Datetime);
        assert_eq!(infer_type(&json!("text")), AttributeType::String);
        assert_eq!(infer_type(&json!(4)), AttributeType::String);
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(map_priority("Critical"), PriorityType::Highest);
        assert_eq!(map_priority("High"), PriorityType::High);
        assert_eq!(map_priority("Normal"), PriorityType::Medium);
        assert_eq!(map_priority("Low"), PriorityType::Low);
        assert_eq!(map_priority("Lowest"), PriorityType::Lowest);
        assert_eq!(map_priority("Trivial"), PriorityType::Lowest);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state("Draft"), StateType::NotReady);
        assert_eq!(map_state("Not ready"), StateType::NotReady);
        assert_eq!(map_state("Approved"), StateType::Ready);
        assert_eq!(map_state("Needs work"), StateType::NeedsWork);
        assert_eq!(map_state("Deprecated"), StateType::NeedsWork);
        assert_eq!(map_state("whatever"), StateType::NotReady);
    }

    #[test]
    fn test_state_mapping_matches_whole_words() {
        assert_eq!(map_state("Renewed and active"), StateType::Ready);
        assert_eq!(map_state("Unapproved"), StateType::NotReady);
        assert_eq!(map_state("Preview ready"), StateType::Ready);
        assert_eq!(map_state("Ready-for-review"), StateType::NeedsWork);
        assert_eq!(map_state("  NOT   READY "), StateType::NotReady);
        assert_eq!(map_state(""), StateType::NotReady);
    }
}
