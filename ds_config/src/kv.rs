//! ABOUTME: Parser for the scheduler's `key=value` configuration file format
//! ABOUTME: Comments start with `#` or `;`; dotted keys nest into a JSON tree

use std::collections::BTreeMap;

/// Parse a `key=value` text document into a flat, ordered map.
///
/// Blank lines and lines whose first non-whitespace character is `#` or `;`
/// are ignored. `key = value` and `key=value` are both accepted; surrounding
/// whitespace around the key and value is trimmed.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    out
}

/// Turn a flat, dotted-key map (`"scheduler.check_interval" -> "5"`) into a
/// nested [`serde_json::Value`] tree, the shape `config::Config` expects
/// when fed a JSON source.
pub fn nest(flat: &BTreeMap<String, String>) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value);
    }
    serde_json::Value::Object(root)
}

fn insert_path(map: &mut serde_json::Map<String, serde_json::Value>, parts: &[&str], value: &str) {
    match parts {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), coerce(value));
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let serde_json::Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Coerce a raw string value into bool/number/string the way a human-edited
/// config file expects ("true"/"false", integers, everything else a string).
fn coerce(value: &str) -> serde_json::Value {
    if let Ok(b) = value.parse::<bool>() {
        return serde_json::Value::Bool(b);
    }
    if let Ok(i) = value.parse::<i64>() {
        return serde_json::Value::Number(i.into());
    }
    if let Ok(f) = value.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_comments_and_blanks() {
        let text = "# comment\n; also comment\n\nkey=value\n";
        let parsed = parse(text);
        assert_eq!(parsed.get("key"), Some(&"value".to_string()));
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn trims_whitespace_around_equals() {
        let parsed = parse("scheduler.check_interval = 5\n");
        assert_eq!(
            parsed.get("scheduler.check_interval"),
            Some(&"5".to_string())
        );
    }

    #[test]
    fn nests_dotted_keys() {
        let mut flat = BTreeMap::new();
        flat.insert("scheduler.check_interval".to_string(), "5".to_string());
        flat.insert(
            "scheduler.executor_selection_strategy".to_string(),
            "RANDOM".to_string(),
        );
        flat.insert("db.pool_size".to_string(), "10".to_string());

        let nested = nest(&flat);
        assert_eq!(nested["scheduler"]["check_interval"], 5);
        assert_eq!(nested["scheduler"]["executor_selection_strategy"], "RANDOM");
        assert_eq!(nested["db"]["pool_size"], 10);
    }

    #[test]
    fn coerces_booleans_and_numbers() {
        assert_eq!(coerce("true"), serde_json::Value::Bool(true));
        assert_eq!(coerce("42"), serde_json::json!(42));
        assert_eq!(coerce("hello"), serde_json::json!("hello"));
    }
}
