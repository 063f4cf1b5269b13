//! In-memory model of an exposition: samples, families, and the metric set.

use std::fmt;

use indexmap::IndexMap;

use crate::kind::MetricKind;
use crate::label::LabelSet;
use crate::suffix;

/// Maximum combined UTF-8 character count of an exemplar's label names and
/// values, as fixed by the OpenMetrics specification.
pub const EXEMPLAR_MAX_LABEL_SET_LENGTH: usize = 128;

/// A reference to a value outside of the metric set, attached to a sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Labels identifying the referenced value, e.g. a trace id.
    pub labels: LabelSet,
    /// The exemplar's value.
    pub value: f64,
    /// Optional timestamp, in milliseconds since the epoch.
    pub timestamp: Option<i64>,
}

impl fmt::Display for Exemplar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.labels, self.value)?;
        if let Some(timestamp) = self.timestamp {
            write!(f, " {}", timestamp)?;
        }
        Ok(())
    }
}

/// One recorded sample of a metric family.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Metric {
    pub name: String,
    pub labels: LabelSet,
    /// Milliseconds since the epoch; defaulted from the validator's clock
    /// when the sample carried no timestamp.
    pub timestamp: i64,
    pub value: f64,
    pub exemplar: Option<Exemplar>,
}

impl Metric {
    /// Deduplication key: samples with equal keys describe the same series.
    pub(crate) fn key(&self) -> String {
        format!("{}{}", self.name, self.labels)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.labels.is_empty() {
            write!(f, "{}", self.labels)?;
        }
        write!(f, " {} {}", self.value, self.timestamp)?;
        if let Some(exemplar) = &self.exemplar {
            write!(f, " # {}", exemplar)?;
        }
        Ok(())
    }
}

/// A metric family: metadata slots plus the samples recorded under the
/// family's name in the current exposition.
///
/// The metadata slots are tri-valued: `None` until a directive or the
/// defaulting pass fills them.  `metrics` deduplicates by series key and
/// retains the first sample per key; `by_appearance` keeps every sample in
/// exposition order, which the bucket-ordering rules depend on.
#[derive(Clone, Debug, Default)]
pub(crate) struct MetricFamily {
    pub kind: Option<MetricKind>,
    pub help: Option<String>,
    pub unit: Option<String>,
    pub metrics: IndexMap<String, Metric>,
    pub by_appearance: Vec<Metric>,
    pub with_timestamp: bool,
    pub without_timestamp: bool,
}

impl MetricFamily {
    /// The family's kind, treating an unset slot as [`MetricKind::Unknown`].
    pub(crate) fn effective_kind(&self) -> MetricKind {
        self.kind.unwrap_or(MetricKind::Unknown)
    }

    /// Fills any still-unset metadata slot with its default.
    pub(crate) fn set_default_metadata(&mut self) {
        if self.kind.is_none() {
            self.kind = Some(MetricKind::Unknown);
        }
        if self.help.is_none() {
            self.help = Some(String::new());
        }
        if self.unit.is_none() {
            self.unit = Some(String::new());
        }
    }

    /// Drops the appearance list once finalization is done; the rolled-over
    /// set only needs the deduplicated series for pairwise comparison.
    pub(crate) fn reset_after_validate(&mut self) {
        self.by_appearance.clear();
    }
}

/// All metric families of one exposition, keyed by family name in insertion
/// order.
#[derive(Debug, Default)]
pub(crate) struct MetricSet {
    pub families: IndexMap<String, MetricFamily>,
}

impl MetricSet {
    pub(crate) fn new() -> MetricSet {
        MetricSet::default()
    }

    /// Maps a sample name to its owning family name.
    ///
    /// A family already declared via metadata claims the sample name when it
    /// matches the family name plus one of the declared kind's reserved
    /// suffixes (or the bare family name, for kinds permitting empty-suffix
    /// samples); the longest claiming family name wins.  Otherwise the
    /// global reserved-suffix table decides, first match in table order.
    pub(crate) fn classify<'a>(&self, sample_name: &'a str) -> &'a str {
        let mut best: Option<&str> = None;
        for (name, family) in &self.families {
            let Some(kind) = family.kind else { continue };
            if suffix::claims(name, kind, sample_name)
                && best.map_or(true, |b| name.len() > b.len())
            {
                best = Some(name.as_str());
            }
        }
        match best {
            Some(family_name) => &sample_name[..family_name.len()],
            None => suffix::strip_reserved_suffix(sample_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Metric, MetricFamily, MetricSet};
    use crate::kind::MetricKind;
    use crate::label::LabelSet;

    fn sample(name: &str, pairs: &[(&str, &str)]) -> Metric {
        Metric {
            name: name.to_string(),
            labels: pairs.iter().map(|(k, v)| (*k, *v)).collect(),
            timestamp: 0,
            value: 1.0,
            exemplar: None,
        }
    }

    fn set_with(families: &[(&str, MetricKind)]) -> MetricSet {
        let mut set = MetricSet::new();
        for (name, kind) in families {
            let family = MetricFamily { kind: Some(*kind), ..MetricFamily::default() };
            set.families.insert(name.to_string(), family);
        }
        set
    }

    #[test]
    fn test_metric_key_includes_name_and_labels() {
        let a = sample("a_sum", &[]);
        let b = sample("a_count", &[]);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), sample("a_sum", &[]).key());
    }

    #[test]
    fn test_metric_display() {
        let mut m = sample("a", &[("x", "1")]);
        m.value = 2.0;
        m.timestamp = 3;
        assert_eq!(m.to_string(), "a{x=\"1\"} 2 3");

        let bare = sample("b", &[]);
        assert_eq!(bare.to_string(), "b 1 0");
    }

    #[test]
    fn test_classify_prefers_declared_family() {
        let set = set_with(&[("a", MetricKind::Histogram)]);
        assert_eq!(set.classify("a_bucket"), "a");
        assert_eq!(set.classify("a_count"), "a");

        // A declared gauge owns its own suffixed name outright.
        let set = set_with(&[("a_bucket", MetricKind::Gauge)]);
        assert_eq!(set.classify("a_bucket"), "a_bucket");

        // The longer declared family wins over the shorter one.
        let set = set_with(&[("a", MetricKind::Histogram), ("a_bucket", MetricKind::Gauge)]);
        assert_eq!(set.classify("a_bucket"), "a_bucket");
    }

    #[test]
    fn test_classify_falls_back_to_suffix_table() {
        let set = MetricSet::new();
        assert_eq!(set.classify("a_total"), "a");
        assert_eq!(set.classify("a_bucket"), "a");
        assert_eq!(set.classify("a_info"), "a");
        assert_eq!(set.classify("quantile"), "quantile");
    }

    #[test]
    fn test_default_metadata_fills_unset_slots() {
        let mut family = MetricFamily { help: Some("kept".to_string()), ..Default::default() };
        family.set_default_metadata();
        assert_eq!(family.kind, Some(MetricKind::Unknown));
        assert_eq!(family.help.as_deref(), Some("kept"));
        assert_eq!(family.unit.as_deref(), Some(""));
    }

    #[test]
    fn test_labelset_from_pairs() {
        let labels: LabelSet = [("a", "1")].into_iter().collect();
        assert_eq!(labels.get("a"), Some("1"));
    }
}
