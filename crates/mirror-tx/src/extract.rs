//! Typed access into loosely structured JSON.
//!
//! Every accessor follows the same policy: a missing key, an intermediate
//! value that is not an object, or a terminal value of the wrong type all
//! degrade to the type's empty value. Nothing here fails.

use serde_json::{Map, Value};

/// Read-only view over a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fields<'a> {
    root: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    /// Wraps any value; non-objects behave like an empty object.
    pub fn new(value: &'a Value) -> Self {
        Self {
            root: value.as_object(),
        }
    }

    pub fn from_map(map: &'a Map<String, Value>) -> Self {
        Self { root: Some(map) }
    }

    /// Value reached by descending `path`, if every step exists.
    pub fn lookup(&self, path: &[&str]) -> Option<&'a Value> {
        let (last, parents) = path.split_last()?;
        let mut current = self.root?;
        for key in parents {
            current = current.get(*key)?.as_object()?;
        }
        current.get(*last)
    }

    /// Nested object at `path`, or an empty view.
    pub fn object(&self, path: &[&str]) -> Fields<'a> {
        Fields {
            root: self.lookup(path).and_then(Value::as_object),
        }
    }

    /// String at `path`, or `""`.
    pub fn str(&self, path: &[&str]) -> &'a str {
        self.lookup(path).and_then(Value::as_str).unwrap_or_default()
    }

    /// Integer at `path`; fractional numbers are truncated toward zero.
    pub fn i64(&self, path: &[&str]) -> i64 {
        self.lookup(path).map(number_as_i64).unwrap_or_default()
    }

    /// Like [`Fields::i64`] but also accepts decimal strings such as `"201"`.
    pub fn lenient_i64(&self, path: &[&str]) -> i64 {
        match self.lookup(path) {
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            Some(other) => number_as_i64(other),
            None => 0,
        }
    }
}

fn number_as_i64(value: &Value) -> i64 {
    match value.as_i64() {
        Some(n) => n,
        // `as` saturates on overflow and maps NaN to zero
        None => value.as_f64().map(|f| f as i64).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descends_nested_objects() {
        let value = json!({"request": {"url": "/a", "meta": {"depth": 2}}});
        let fields = Fields::new(&value);

        assert_eq!(fields.str(&["request", "url"]), "/a");
        assert_eq!(fields.i64(&["request", "meta", "depth"]), 2);
        assert_eq!(fields.object(&["request"]).str(&["url"]), "/a");
    }

    #[test]
    fn missing_or_mismatched_values_default() {
        let value = json!({"request": {"url": 17, "headers": null}, "info": "flat"});
        let fields = Fields::new(&value);

        assert_eq!(fields.str(&["request", "url"]), "");
        assert_eq!(fields.str(&["request", "headers"]), "");
        assert_eq!(fields.str(&["request", "absent"]), "");
        assert_eq!(fields.i64(&["info", "dateTime"]), 0);
        assert_eq!(fields.i64(&["nowhere", "at", "all"]), 0);
        assert_eq!(fields.str(&[]), "");
    }

    #[test]
    fn non_object_root_is_empty() {
        let value = json!([1, 2, 3]);
        let fields = Fields::new(&value);
        assert!(fields.lookup(&["0"]).is_none());
        assert_eq!(fields.object(&["x"]).str(&["y"]), "");
    }

    #[test]
    fn integers_from_floats_and_strings() {
        let value = json!({"a": 1700000000000.0, "b": 12.9, "c": "201", "d": "abc"});
        let fields = Fields::new(&value);

        assert_eq!(fields.i64(&["a"]), 1_700_000_000_000);
        assert_eq!(fields.i64(&["b"]), 12);
        assert_eq!(fields.i64(&["c"]), 0);
        assert_eq!(fields.lenient_i64(&["c"]), 201);
        assert_eq!(fields.lenient_i64(&["d"]), 0);
        assert_eq!(fields.lenient_i64(&["b"]), 12);
    }
}
