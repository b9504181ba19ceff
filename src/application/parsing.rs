//! # Parsing Utils
//!
//! Extracts structured actions from raw generated text. Primary strategy is
//! json-tagged fenced blocks; a legacy call-syntax scan runs only when the
//! block scan finds nothing at all. The two strategies are never mixed
//! within one parse.

use crate::domain::types::{Action, ActionKind};
use regex::Regex;
use serde_json::Value;

/// Parse an ordered list of actions from generated text.
///
/// Pure and infallible: malformed blocks and patterns are silently skipped,
/// and identical input always yields the identical ordered list.
pub fn parse_actions(text: &str) -> Vec<Action> {
    let mut actions = Vec::new();

    // ```json fenced blocks, in document order
    let fence = Regex::new(r"(?s)```(\w+)?\s*\n(.*?)```").unwrap();
    for caps in fence.captures_iter(text) {
        let language = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let content = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();

        if !language.eq_ignore_ascii_case("json") {
            continue;
        }

        if content.starts_with('{') && content.contains("type") {
            if let Ok(value) = serde_json::from_str::<Value>(content) {
                if let Some(action) = action_from_value(&value) {
                    actions.push(action);
                }
            }
        } else if content.starts_with('[') {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(content) {
                for item in &items {
                    if let Some(action) = action_from_value(item) {
                        actions.push(action);
                    }
                }
            }
        }
    }

    // Legacy call-syntax fallback, only when the block scan found nothing.
    if actions.is_empty() {
        parse_legacy_calls(text, &mut actions);
    }

    actions
}

/// Build an action from a parsed JSON value. Requires an object with a
/// string `type` key; `params` defaults to an empty map.
fn action_from_value(value: &Value) -> Option<Action> {
    let obj = value.as_object()?;
    let kind = ActionKind::from_wire(obj.get("type")?.as_str()?);
    let params = obj
        .get("params")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    Some(Action::new(kind, params))
}

/// Scan for the legacy `READ_FILE('...')`-style call forms. Each pattern is
/// matched independently over the whole text, in a fixed pattern order,
/// contributing one action per match in match order.
fn parse_legacy_calls(text: &str, actions: &mut Vec<Action>) {
    let read_re = Regex::new(r#"READ_FILE\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    for caps in read_re.captures_iter(text) {
        if let Some(path) = caps.get(1) {
            actions.push(single_param(ActionKind::ReadFile, "filepath", path.as_str()));
        }
    }

    let write_re = Regex::new(
        r#"(?s)WRITE_FILE\s*\(\s*['"]([^'"]+)['"]\s*,\s*(?:'([^']*)'|"([^"]*)")\s*\)"#,
    )
    .unwrap();
    for caps in write_re.captures_iter(text) {
        let path = caps.get(1).map(|m| m.as_str());
        let content = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
        if let (Some(path), Some(content)) = (path, content) {
            let mut params = serde_json::Map::new();
            params.insert("filepath".to_string(), Value::String(path.to_string()));
            params.insert("content".to_string(), Value::String(content.to_string()));
            actions.push(Action::new(ActionKind::WriteFile, params));
        }
    }

    let run_re = Regex::new(r#"(?s)RUN_CODE\s*\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#).unwrap();
    for caps in run_re.captures_iter(text) {
        if let Some(code) = caps.get(1).or_else(|| caps.get(2)) {
            actions.push(single_param(ActionKind::RunCode, "code", code.as_str()));
        }
    }

    let list_re = Regex::new(r#"LIST_FILES\s*\(\s*(?:['"]([^'"]+)['"]\s*)?\)"#).unwrap();
    for caps in list_re.captures_iter(text) {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        actions.push(single_param(ActionKind::ListFiles, "path", path));
    }

    let mkdir_re = Regex::new(r#"CREATE_DIR\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    for caps in mkdir_re.captures_iter(text) {
        if let Some(path) = caps.get(1) {
            actions.push(single_param(ActionKind::CreateDirectory, "path", path.as_str()));
        }
    }
}

fn single_param(kind: ActionKind, key: &str, value: &str) -> Action {
    let mut params = serde_json::Map::new();
    params.insert(key.to_string(), Value::String(value.to_string()));
    Action::new(kind, params)
}
