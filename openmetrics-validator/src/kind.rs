use std::fmt;

/// Metric family kind.
///
/// The closed set of metric types defined by the OpenMetrics specification.
/// A family without a `# TYPE` line defaults to [`MetricKind::Unknown`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MetricKind {
    /// Monotonically non-decreasing total, exposed with a `_total` suffix.
    Counter,
    /// Current measurement that can go up and down.
    Gauge,
    /// Quantile summary with `_count`/`_sum` series.
    Summary,
    /// Cumulative histogram with `le`-bucketed series.
    Histogram,
    /// Histogram whose buckets are current measurements rather than totals.
    GaugeHistogram,
    /// Textual build/role information, always valued 1.
    Info,
    /// Set of boolean states keyed by a label named after the family.
    Stateset,
    /// No declared type.
    Unknown,
}

impl MetricKind {
    /// The kind's name as it appears in a `# TYPE` line.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Summary => "summary",
            MetricKind::Histogram => "histogram",
            MetricKind::GaugeHistogram => "gaugehistogram",
            MetricKind::Info => "info",
            MetricKind::Stateset => "stateset",
            MetricKind::Unknown => "unknown",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<MetricKind> {
        match s {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "summary" => Some(MetricKind::Summary),
            "histogram" => Some(MetricKind::Histogram),
            "gaugehistogram" => Some(MetricKind::GaugeHistogram),
            "info" => Some(MetricKind::Info),
            "stateset" => Some(MetricKind::Stateset),
            "unknown" => Some(MetricKind::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
