use serde_json::{Map, Value};

/// Default state separator when settings don't define one.
pub const DEFAULT_SEPARATOR: &str = " ";

/// Deep-merges `src` into `dst`.
///
/// - Nested objects are merged recursively
/// - Any other value (scalar, array, null) replaces the destination value
/// - A non-object `dst` is replaced by `src` as a whole
pub fn extend(dst: &mut Value, src: &Value) {
	match (dst, src) {
		(Value::Object(dst), Value::Object(src)) => {
			for (key, value) in src {
				match dst.get_mut(key) {
					Some(old) if old.is_object() && value.is_object() => extend(old, value),
					_ => {
						dst.insert(key.clone(), value.clone());
					}
				}
			}
		}
		(dst, src) => *dst = src.clone(),
	}
}

/// Returns `settings` as an object, replacing anything else by `{}`.
pub fn normalize(settings: Option<Value>) -> Value {
	match settings {
		Some(value @ Value::Object(_)) => value,
		_ => Value::Object(Map::new()),
	}
}

/// Reads `settings.storage.state_separator`, or the default separator.
pub fn separator(settings: &Value) -> String {
	settings
		.get("storage")
		.and_then(|storage| storage.get("state_separator"))
		.and_then(Value::as_str)
		.unwrap_or(DEFAULT_SEPARATOR)
		.to_owned()
}

/// Sets `settings[section][key] = value`, creating `section` if needed.
///
/// A non-object `settings` (or `section`) is replaced by an empty object first.
pub fn set(settings: &mut Value, section: &str, key: &str, value: Value) {
	if !settings.is_object() {
		*settings = Value::Object(Map::new());
	}
	if let Value::Object(root) = settings {
		let entry = root.entry(section.to_owned()).or_insert_with(|| Value::Object(Map::new()));
		if !entry.is_object() {
			*entry = Value::Object(Map::new());
		}
		if let Value::Object(map) = entry {
			map.insert(key.to_owned(), value);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn extend_merges_nested_objects() {
		let mut dst = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": {"f": 4}});
		extend(&mut dst, &json!({"a": 10, "b": {"c": 20}, "e": 5, "g": {"h": 6}}));
		assert_eq!(dst, json!({"a": 10, "b": {"c": 20, "d": 3}, "e": 5, "g": {"h": 6}}));
	}

	#[test]
	fn extend_replaces_arrays() {
		let mut dst = json!({"sizes": [1, 2, 3]});
		extend(&mut dst, &json!({"sizes": [4]}));
		assert_eq!(dst, json!({"sizes": [4]}));
	}

	#[test]
	fn separator_default_and_override() {
		assert_eq!(separator(&json!({})), " ");
		assert_eq!(separator(&json!({"storage": {"state_separator": ":"}})), ":");
	}

	#[test]
	fn set_creates_missing_objects() {
		let mut settings = json!({"storage": 1});
		set(&mut settings, "storage", "state_separator", json!("-"));
		assert_eq!(settings, json!({"storage": {"state_separator": "-"}}));
		assert_eq!(normalize(Some(json!([1]))), json!({}));
	}
}
