use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::parser::ParseError;

/// Severity of a validation rule, mirroring the OpenMetrics specification's
/// `SHOULD` and `MUST` requirement levels.
///
/// Levels are ordered by severity, so a threshold of [`ErrorLevel::Must`]
/// selects only `MUST` violations while [`ErrorLevel::Should`] selects both.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorLevel {
    /// The exposition violates a `SHOULD` requirement.
    Should,
    /// The exposition violates a `MUST` requirement.
    Must,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLevel::Should => f.write_str("should"),
            ErrorLevel::Must => f.write_str("must"),
        }
    }
}

/// Error returned when parsing an unrecognized error level string.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown error level {0:?}")]
pub struct InvalidErrorLevel(String);

impl FromStr for ErrorLevel {
    type Err = InvalidErrorLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "should" => Ok(ErrorLevel::Should),
            "must" => Ok(ErrorLevel::Must),
            other => Err(InvalidErrorLevel(other.to_string())),
        }
    }
}

/// A single violation of the OpenMetrics specification.
///
/// Messages follow the wording of the specification where it states the rule
/// outright.  Every violation carries a severity, exposed via
/// [`level`](Violation::level).
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Violation {
    /// A second `# TYPE` line was seen for the same metric family.
    #[error("metric type already set")]
    TypeAlreadySet,

    /// A second `# HELP` line was seen for the same metric family.
    #[error("help already set")]
    HelpAlreadySet,

    /// A second `# UNIT` line was seen for the same metric family.
    #[error("unit already set")]
    UnitAlreadySet,

    /// Consecutive metadata lines named different families before any sample
    /// of the first family appeared.
    #[error("metric name changed from {from:?} to {to:?}")]
    MetricNameChanged {
        /// The family named by the earlier metadata line.
        from: String,
        /// The family named by the later metadata line.
        to: String,
    },

    /// A family was picked up again after a different family was exposed.
    #[error("MetricFamilies MUST NOT be interleaved")]
    FamiliesInterleaved,

    /// Some samples of a family carried a timestamp while others did not.
    #[error("Mix of timestamp presence within a group")]
    MixedTimestampPresence,

    /// A label name appeared more than once within a single label set.
    #[error("Label names MUST be unique within a LabelSet")]
    DuplicateLabelNames,

    /// A repeated sample's timestamp did not increase.
    #[error("MetricPoints MUST have monotonically increasing timestamps")]
    TimestampNotIncreasing,

    /// A counter's value decreased between two observations.
    #[error("counter total MUST be monotonically non-decreasing over time")]
    CounterValueDecreased,

    /// A counter-like value (counter total, histogram bucket/sum/count,
    /// summary sum/count) was NaN or negative.
    #[error("counter-like values MUST NOT be NaN or negative")]
    CounterValueInvalid,

    /// A histogram exposed no bucket with a `+Inf` threshold.
    #[error("Histogram MetricPoints MUST have at least a bucket with an +Inf threshold")]
    MissingPositiveInfBucket,

    /// Histogram buckets were not sorted by ascending `le`.
    #[error("histogram must have buckets in order")]
    HistogramBucketsOutOfOrder,

    /// Cumulative histogram bucket values were not non-decreasing.
    #[error("bucket value for le={le} is out of order: last={last}, cur={cur}")]
    BucketValueOutOfOrder {
        /// Threshold of the offending bucket.
        le: f64,
        /// Value of the preceding bucket.
        last: f64,
        /// Value of the offending bucket.
        cur: f64,
    },

    /// A histogram exposed `_sum` without `_count` or vice versa.
    #[error("histogram must have both _sum and _count or neither")]
    SumCountCoupling,

    /// A histogram exposed `_sum` together with a negative bucket threshold.
    #[error("Cannot have _sum with negative buckets")]
    SumWithNegativeBuckets,

    /// A gauge histogram bucket value was NaN or negative.
    #[error("gauge histogram bucket value must not be NaN or negative")]
    GaugeHistogramBucketValueInvalid,

    /// A gauge histogram `_gsum` value was NaN.
    #[error("gauge histogram _gsum value must not be NaN")]
    GaugeHistogramGSumNaN,

    /// Gauge histogram buckets were not sorted by ascending `le`.
    #[error("gauge histogram must have buckets in order")]
    GaugeHistogramBucketsOutOfOrder,

    /// A gauge histogram had a negative `_gsum` but no negative bucket.
    #[error("Cannot have negative _gsum with non-negative buckets")]
    NegativeGSumWithNonNegativeBuckets,

    /// A gauge histogram exposed `_gsum` without `_gcount` or vice versa.
    #[error("must have both _gsum and _gcount or neither")]
    GSumGCountCoupling,

    /// A summary `_count` or `_sum` value was NaN or negative.
    #[error("Count and Sum values are counters so MUST NOT be NaN or negative")]
    SummaryCountSumInvalid,

    /// A summary quantile sample had a negative value.
    #[error("Quantile values MUST NOT be negative")]
    QuantileValueNegative,

    /// A summary quantile was outside of `[0, 1]` or NaN.
    #[error("Quantiles MUST be between 0 and 1 inclusive")]
    QuantileOutOfRange,

    /// A summary quantile sample's `quantile` label did not parse as a float.
    #[error("invalid quantile label value {0:?}")]
    InvalidQuantileLabel(String),

    /// A histogram bucket's `le` label did not parse as a float.
    #[error("invalid le label value {0:?}")]
    InvalidBucketLabel(String),

    /// An info sample's value was not exactly 1.
    #[error("The Sample value MUST always be 1")]
    InfoValueNotOne,

    /// A stateset sample's value was neither 0 nor 1.
    #[error("The State sample's value MUST be 1 if the State is true and MUST be 0 if the State is false")]
    StateSetValueInvalid,

    /// A stateset sample lacked a label named after its metric family.
    #[error("Each State's sample MUST have a label with the MetricFamily name as the label name and the State name as the label value")]
    StateSetMissingLabel,

    /// An info family declared a non-empty unit.
    #[error("MetricFamilies of type Info MUST have an empty Unit string")]
    UnitForInfo,

    /// A stateset family declared a non-empty unit.
    #[error("MetricFamilies of type StateSets MUST have an empty Unit string")]
    UnitForStateSet,

    /// An exemplar was attached to a sample of a kind that cannot carry one.
    #[error("only histogram/gaugehistogram buckets and counters can have exemplars")]
    ExemplarNotAllowed,

    /// The combined length of an exemplar's label names and values exceeded
    /// the specification's limit.
    #[error("exemplar label contents of {0} exceeds maximum of 128 UTF-8 characters")]
    ExemplarLabelsTooLong(usize),

    /// A series present in the previous exposition was gone from the current
    /// one.
    #[error("metrics and samples SHOULD NOT appear and disappear from exposition to exposition")]
    SeriesDisappeared,

    /// The same label name and value appeared on every sample of the set.
    #[error("the same label name and value SHOULD NOT appear on every Metric within a MetricSet")]
    DuplicateLabelOnAllMetrics,
}

impl Violation {
    /// Severity of this violation.
    pub fn level(&self) -> ErrorLevel {
        match self {
            Violation::SeriesDisappeared | Violation::DuplicateLabelOnAllMetrics => {
                ErrorLevel::Should
            }
            _ => ErrorLevel::Must,
        }
    }
}

/// A violation, or parse failure, attributed to the place it was observed.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The exposition could not be parsed.  Parsing stops at the first such
    /// error and the exposition is discarded without rolling forward.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A violation attributed to a single sample.
    #[error("error for metric {metric}: {violation}")]
    Metric {
        /// Rendered form of the offending sample.
        metric: String,
        /// The rule that was violated.
        violation: Violation,
    },

    /// A violation attributed to a whole metric family.
    #[error("error for metric family {family}: {violation}")]
    MetricFamily {
        /// Name of the offending family.
        family: String,
        /// The rule that was violated.
        violation: Violation,
    },

    /// A violation attributed to the exposition as a whole.
    #[error("{0}")]
    Exposition(Violation),
}

impl ValidationError {
    /// Severity of this error.  Parse failures are always `MUST`-level.
    pub fn level(&self) -> ErrorLevel {
        match self {
            ValidationError::Parse(_) => ErrorLevel::Must,
            ValidationError::Metric { violation, .. }
            | ValidationError::MetricFamily { violation, .. }
            | ValidationError::Exposition(violation) => violation.level(),
        }
    }

    /// The underlying rule violation, if this is not a parse failure.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            ValidationError::Parse(_) => None,
            ValidationError::Metric { violation, .. }
            | ValidationError::MetricFamily { violation, .. }
            | ValidationError::Exposition(violation) => Some(violation),
        }
    }
}

/// All errors discovered while validating one exposition.
///
/// A single [`Validator::validate`](crate::Validator::validate) call reports
/// every discovered error, not just the first.  Severity filtering happens
/// when the collection is produced, so the set returned at
/// [`ErrorLevel::Must`] is always a subset of the set returned at
/// [`ErrorLevel::Should`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Iterates over the contained errors in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Number of contained errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no errors are contained.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any contained error is a parse failure.
    ///
    /// A parse failure terminates the exposition without rolling state
    /// forward; callers driving repeated scrapes should
    /// [`reset`](crate::Validator::reset) the validator when this is true.
    pub fn has_parse_error(&self) -> bool {
        self.errors.iter().any(|e| matches!(e, ValidationError::Parse(_)))
    }

    /// Returns the subset of errors at or above `level`.
    pub fn at_or_above(&self, level: ErrorLevel) -> ValidationErrors {
        ValidationErrors {
            errors: self.errors.iter().filter(|e| e.level() >= level).cloned().collect(),
        }
    }
}

impl From<Vec<ValidationError>> for ValidationErrors {
    fn from(errors: Vec<ValidationError>) -> Self {
        ValidationErrors { errors }
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if first {
                first = false;
            } else {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::{ErrorLevel, ValidationError, ValidationErrors, Violation};

    #[test]
    fn test_error_level_ordering() {
        assert!(ErrorLevel::Must > ErrorLevel::Should);
        assert_eq!("must".parse::<ErrorLevel>().unwrap(), ErrorLevel::Must);
        assert_eq!("should".parse::<ErrorLevel>().unwrap(), ErrorLevel::Should);
        assert!("warn".parse::<ErrorLevel>().is_err());
        assert_eq!(ErrorLevel::Must.to_string(), "must");
        assert_eq!(ErrorLevel::Should.to_string(), "should");
    }

    #[test]
    fn test_violation_levels() {
        assert_eq!(Violation::SeriesDisappeared.level(), ErrorLevel::Should);
        assert_eq!(Violation::DuplicateLabelOnAllMetrics.level(), ErrorLevel::Should);
        assert_eq!(Violation::TypeAlreadySet.level(), ErrorLevel::Must);
        assert_eq!(Violation::CounterValueDecreased.level(), ErrorLevel::Must);
    }

    #[test]
    fn test_scoped_display() {
        let err = ValidationError::MetricFamily {
            family: "a".to_string(),
            violation: Violation::TypeAlreadySet,
        };
        assert_eq!(err.to_string(), "error for metric family a: metric type already set");
    }

    #[test]
    fn test_filtering_is_monotonic() {
        let all = ValidationErrors::from(vec![
            ValidationError::Exposition(Violation::DuplicateLabelOnAllMetrics),
            ValidationError::MetricFamily {
                family: "a".to_string(),
                violation: Violation::MixedTimestampPresence,
            },
        ]);
        let must = all.at_or_above(ErrorLevel::Must);
        let should = all.at_or_above(ErrorLevel::Should);
        assert_eq!(must.len(), 1);
        assert_eq!(should.len(), 2);
        for err in must.iter() {
            assert!(should.iter().any(|e| e == err));
        }
    }
}
