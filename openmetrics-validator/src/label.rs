use std::fmt;

/// A label name/value pair attached to a sample.
///
/// Labels differentiate the context of samples within a metric family, such
/// as the handler path of a request counter or the `le` threshold of a
/// histogram bucket.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Label(String, String);

impl Label {
    /// Creates a [`Label`] from a name and value.
    pub fn new<K, V>(name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Label(name.into(), value.into())
    }

    /// Name of this label.
    pub fn name(&self) -> &str {
        self.0.as_str()
    }

    /// Value of this label.
    pub fn value(&self) -> &str {
        self.1.as_str()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=\"{}\"", self.0, escape_label_value(&self.1))
    }
}

/// An ordered sequence of labels, as exposed on one sample.
///
/// The sequence preserves exposition order and duplicates; rejecting
/// duplicate names is a validation rule, not a parsing concern.  The
/// [`Display`](fmt::Display) form (`{a="b",c="d"}`, with label values
/// escaped) is canonical: two label sets render identically if and only if
/// their names and values match pairwise, which makes it usable as a
/// deduplication key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    /// Creates an empty [`LabelSet`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label, preserving exposition order.
    pub fn push(&mut self, label: Label) {
        self.labels.push(label);
    }

    /// Value of the first label with the given name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.iter().find(|l| l.name() == name).map(Label::value)
    }

    /// Whether a label with the given name is present.
    pub fn has(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name() == name)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the set contains no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterates over the labels in exposition order.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub(crate) fn has_duplicate_names(&self) -> bool {
        for (i, label) in self.labels.iter().enumerate() {
            if self.labels[..i].iter().any(|l| l.name() == label.name()) {
                return true;
            }
        }
        false
    }

    /// A copy of this set without labels named in `names`.
    pub(crate) fn without(&self, names: &[&str]) -> LabelSet {
        LabelSet {
            labels: self
                .labels
                .iter()
                .filter(|l| !names.contains(&l.name()))
                .cloned()
                .collect(),
        }
    }

    /// The pairs of `self` whose name and value both also appear in `other`.
    pub(crate) fn shared_pairs(&self, other: &LabelSet) -> LabelSet {
        LabelSet {
            labels: self
                .labels
                .iter()
                .filter(|l| other.get(l.name()) == Some(l.value()))
                .cloned()
                .collect(),
        }
    }

    /// Total number of UTF-8 characters across all label names and values.
    pub(crate) fn char_len(&self) -> usize {
        self.labels
            .iter()
            .map(|l| l.name().chars().count() + l.value().chars().count())
            .sum()
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        LabelSet { labels: iter.into_iter().map(|(k, v)| Label::new(k, v)).collect() }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for label in &self.labels {
            if first {
                first = false;
            } else {
                f.write_str(",")?;
            }
            write!(f, "{}", label)?;
        }
        f.write_str("}")
    }
}

/// Escapes a label value for the text format: backslashes, double quotes,
/// and line feeds become `\\`, `\"`, and `\n`.
pub(crate) fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{escape_label_value, LabelSet};

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_display_known_cases() {
        let cases: &[(&[(&str, &str)], &str)] = &[
            (&[], "{}"),
            (&[("a", "b")], "{a=\"b\"}"),
            (&[("a", "b"), ("c", "d")], "{a=\"b\",c=\"d\"}"),
            (&[("a", "q\"u\"x")], "{a=\"q\\\"u\\\"x\"}"),
            (&[("a", "back\\slash")], "{a=\"back\\\\slash\"}"),
            (&[("a", "new\nline")], "{a=\"new\\nline\"}"),
        ];
        for (pairs, expected) in cases {
            assert_eq!(labels(pairs).to_string(), *expected);
        }
    }

    #[test]
    fn test_duplicate_names() {
        assert!(!labels(&[("a", "1"), ("b", "1")]).has_duplicate_names());
        assert!(labels(&[("a", "1"), ("a", "1")]).has_duplicate_names());
        assert!(labels(&[("a", "1"), ("b", "2"), ("a", "3")]).has_duplicate_names());
        assert!(!labels(&[]).has_duplicate_names());
    }

    #[test]
    fn test_without() {
        let set = labels(&[("le", "0.5"), ("path", "/")]);
        let filtered = set.without(&["le"]);
        assert_eq!(filtered, labels(&[("path", "/")]));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_shared_pairs() {
        let a = labels(&[("env", "prod"), ("zone", "a")]);
        let b = labels(&[("env", "prod"), ("zone", "b")]);
        assert_eq!(a.shared_pairs(&b), labels(&[("env", "prod")]));
        assert!(a.shared_pairs(&labels(&[])).is_empty());
    }

    #[test]
    fn test_char_len_counts_characters_not_bytes() {
        let set = labels(&[("trace", "日本")]);
        assert_eq!(set.char_len(), 7);
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("plain"), "plain");
        assert_eq!(escape_label_value("a\"b"), "a\\\"b");
        assert_eq!(escape_label_value("a\\b"), "a\\\\b");
        assert_eq!(escape_label_value("a\nb"), "a\\nb");
    }
}
