/// Ordered, case-insensitive header store.
///
/// Names compare ASCII-case-insensitively per RFC 7230 but keep their
/// original casing for the wire (the casing carries no semantics).
/// Insertion order is preserved across names, and multi-valued names
/// (`Set-Cookie` and friends) keep one entry per value so the serializer
/// emits distinct lines.
///
/// Lookup is a linear scan; header counts in practice are far below the
/// point where a map would win.
///
/// Validation of names and values (CRLF injection, 7-bit cleanliness)
/// happens at serialization time, not at insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderStore {
    entries: Vec<(String, String)>,
}

impl HeaderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values for `name` with a single value.
    ///
    /// The new value takes the position of the first existing entry for
    /// `name`, or appends at the end if the name was absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        let mut first = None;
        self.entries.retain_mut(|(n, v)| {
            if n.eq_ignore_ascii_case(&name) {
                if first.is_none() {
                    *v = value.clone();
                    first = Some(());
                    true
                } else {
                    false
                }
            } else {
                true
            }
        });
        if first.is_none() {
            self.entries.push((name, value));
        }
    }

    /// Append a value for `name`, keeping any existing values.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, if any.
    #[must_use]
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether any value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all values for `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of entries (values, not distinct names).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderStore {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "application/json");

        assert_eq!(headers.get_first("content-type"), Some("application/json"));
        assert_eq!(headers.get_first("CONTENT-TYPE"), Some("application/json"));
        assert!(headers.contains("cOnTeNt-TyPe"));
        assert!(!headers.contains("content-length"));
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut headers = HeaderStore::new();
        headers.append("Accept", "text/html");
        headers.append("accept", "application/json");
        headers.set("ACCEPT", "*/*");

        assert_eq!(headers.get_all("accept"), vec!["*/*"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_set_keeps_position_of_first_entry() {
        let mut headers = HeaderStore::new();
        headers.append("a", "1");
        headers.append("b", "2");
        headers.append("a", "3");
        headers.set("a", "4");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("a", "4"), ("b", "2")]);
    }

    #[test]
    fn test_append_preserves_multi_values_in_order() {
        let mut headers = HeaderStore::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("Set-Cookie", "b=2");

        assert_eq!(headers.get_first("set-cookie"), Some("a=1"));
        assert_eq!(headers.get_all("set-cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_insertion_order_across_names() {
        let mut headers = HeaderStore::new();
        headers.append("X-First", "1");
        headers.append("X-Second", "2");
        headers.append("X-First", "3");

        let order: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["X-First", "X-Second", "X-First"]);
    }

    #[test]
    fn test_remove() {
        let mut headers = HeaderStore::new();
        headers.append("X-A", "1");
        headers.append("x-a", "2");
        headers.append("X-B", "3");
        headers.remove("X-A");

        assert!(!headers.contains("x-a"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_from_iterator() {
        let headers: HeaderStore = [("accept", "*/*"), ("x-id", "7")].into_iter().collect();
        assert_eq!(headers.get_first("Accept"), Some("*/*"));
        assert_eq!(headers.get_first("X-Id"), Some("7"));
    }
}
