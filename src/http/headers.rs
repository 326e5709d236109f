//! Ordered key/value stores for message headers and request attributes.

/// Ordered map with unique keys; last write wins and keeps the original
/// position. `CI` selects ASCII case-insensitive key comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields<const CI: bool> {
    entries: Vec<(String, String)>,
}

/// HTTP header fields, case-insensitive names.
pub type Headers = Fields<true>;

/// Request attributes (path captures, query and form fields), case-sensitive.
pub type Attributes = Fields<false>;

impl<const CI: bool> Fields<CI> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn same(a: &str, b: &str) -> bool {
        if CI { a.eq_ignore_ascii_case(b) } else { a == b }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| Self::same(k, key))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let (key, value) = (key.into(), value.into());
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Mutable access, inserting an empty value when missing.
    pub fn entry(&mut self, key: &str) -> &mut String {
        let i = match self.position(key) {
            Some(i) => i,
            None => {
                self.entries.push((key.to_string(), String::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[i].1
    }

    pub fn extend<K, V, I>(&mut self, fields: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in fields {
            self.set(k, v);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Attributes {
    /// Decodes `application/x-www-form-urlencoded` pairs (`a=1&b=2`).
    pub fn parse_form(input: &[u8]) -> Self {
        let mut attrs = Self::new();
        attrs.extend(url::form_urlencoded::parse(input).into_owned());
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_are_case_insensitive() {
        let mut h = Headers::new();
        h.set("Content-Type", "text/plain");
        h.set("content-type", "application/json");

        assert_eq!(h.len(), 1);
        assert_eq!(h.get("CONTENT-TYPE"), Some("application/json"));
        // first spelling is kept
        assert_eq!(h.iter().next(), Some(("Content-Type", "application/json")));
    }

    #[test]
    fn attributes_are_case_sensitive() {
        let mut a = Attributes::new();
        a.set("id", "1");
        a.set("ID", "2");

        assert_eq!(a.len(), 2);
        assert_eq!(a.get("id"), Some("1"));
        assert_eq!(a.remove("ID").as_deref(), Some("2"));
        assert!(!a.contains("ID"));
    }

    #[test]
    fn entry_inserts_empty_value() {
        let mut h = Headers::new();
        h.entry("X-Trace").push_str("abc");
        assert_eq!(h.get("x-trace"), Some("abc"));
    }

    #[test]
    fn form_decoding() {
        let a = Attributes::parse_form(b"name=Bart+Simpson&age=15&note=a%26b&age=16");
        assert_eq!(a.get("name"), Some("Bart Simpson"));
        assert_eq!(a.get("note"), Some("a&b"));
        assert_eq!(a.get("age"), Some("16"));
        assert_eq!(a.len(), 3);
    }
}
