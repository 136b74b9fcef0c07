//! Query-string lookup
//!
//! Decodes `application/x-www-form-urlencoded` query strings (`+` is a space,
//! percent escapes are decoded). Repeated keys keep every value; lookups
//! return the first.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    values: HashMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(q) = query {
            for (key, value) in url::form_urlencoded::parse(q.as_bytes()) {
                values
                    .entry(key.into_owned())
                    .or_default()
                    .push(value.into_owned());
            }
        }
        Self { values }
    }

    /// First value for `key`, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoding() {
        let q = QueryParams::parse(Some("cmd=echo+test&data=I42%0A."));
        assert_eq!(q.get("cmd"), Some("echo test"));
        assert_eq!(q.get("data"), Some("I42\n."));
    }

    #[test]
    fn test_absent_and_empty() {
        let q = QueryParams::parse(Some("cmd="));
        assert_eq!(q.get("cmd"), Some(""));
        assert_eq!(q.get("data"), None);
        assert_eq!(QueryParams::parse(None).get("cmd"), None);
    }

    #[test]
    fn test_first_value_wins() {
        let q = QueryParams::parse(Some("cmd=id&cmd=whoami"));
        assert_eq!(q.get("cmd"), Some("id"));
    }
}
