//! Reserved metric name suffixes and family name classification.

use crate::kind::MetricKind;

pub(crate) struct ReservedSuffixes {
    suffixes: &'static [&'static str],
    allow_empty: bool,
}

/// Reserved suffixes per kind, in classification order.  When no declared
/// family claims a sample name, the first table entry whose suffix matches
/// decides the family name.
const RESERVED_SUFFIXES: &[(MetricKind, ReservedSuffixes)] = &[
    (
        MetricKind::Counter,
        ReservedSuffixes { suffixes: &["_total", "_created"], allow_empty: false },
    ),
    (
        MetricKind::Summary,
        ReservedSuffixes { suffixes: &["_count", "_sum", "_created"], allow_empty: true },
    ),
    (
        MetricKind::Histogram,
        ReservedSuffixes { suffixes: &["_count", "_sum", "_bucket", "_created"], allow_empty: false },
    ),
    (
        MetricKind::GaugeHistogram,
        ReservedSuffixes { suffixes: &["_gcount", "_gsum", "_bucket"], allow_empty: false },
    ),
    (MetricKind::Info, ReservedSuffixes { suffixes: &["_info"], allow_empty: false }),
    (MetricKind::Gauge, ReservedSuffixes { suffixes: &[], allow_empty: true }),
    (MetricKind::Stateset, ReservedSuffixes { suffixes: &[], allow_empty: true }),
    (MetricKind::Unknown, ReservedSuffixes { suffixes: &[], allow_empty: true }),
];

const NO_SUFFIXES: ReservedSuffixes = ReservedSuffixes { suffixes: &[], allow_empty: true };

fn reserved_suffixes(kind: MetricKind) -> &'static ReservedSuffixes {
    // The table covers every kind, so the lookup cannot miss.
    RESERVED_SUFFIXES.iter().find(|(k, _)| *k == kind).map(|(_, rs)| rs).unwrap_or(&NO_SUFFIXES)
}

/// Whether a family of the given kind owns `sample_name`: the sample name is
/// the family name plus one of the kind's reserved suffixes, or equals the
/// family name when the kind permits empty-suffix samples.
pub(crate) fn claims(family_name: &str, kind: MetricKind, sample_name: &str) -> bool {
    let reserved = reserved_suffixes(kind);
    if reserved.allow_empty && sample_name == family_name {
        return true;
    }
    sample_name
        .strip_prefix(family_name)
        .is_some_and(|rest| reserved.suffixes.contains(&rest))
}

/// Strips the first reserved suffix matching `sample_name`, in table order,
/// yielding the family name for a sample whose kind is not yet known.
pub(crate) fn strip_reserved_suffix(sample_name: &str) -> &str {
    for (_, reserved) in RESERVED_SUFFIXES {
        for suffix in reserved.suffixes {
            if let Some(stripped) = sample_name.strip_suffix(suffix) {
                return stripped;
            }
        }
    }
    sample_name
}
