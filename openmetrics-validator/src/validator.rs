//! The validator engine: consumes parsed entries, accumulates the metric
//! set model, and applies the intra- and inter-exposition rules.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{ErrorLevel, ValidationError, ValidationErrors, Violation};
use crate::kind::MetricKind;
use crate::label::LabelSet;
use crate::model::{Metric, MetricFamily, MetricSet, EXEMPLAR_MAX_LABEL_SET_LENGTH};
use crate::parser::{Entry, Parser, Series};

/// Source of "now" in milliseconds since the epoch, used as the default
/// timestamp for samples that carry none.  Injectable so that tests can pin
/// time; the default reads the system clock.
pub type NowFn = Box<dyn Fn() -> i64 + Send>;

fn system_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Whether a repeated sample's timestamp must strictly exceed the earlier
/// one (within one exposition) or merely not decrease (across expositions).
#[derive(Clone, Copy)]
enum TimestampOrder {
    StrictlyIncreasing,
    NonDecreasing,
}

/// Tracks the family named by consecutive metadata lines, so that metadata
/// for two different families cannot be mixed before a sample appears.
#[derive(Default)]
struct MetadataTracker {
    name: Option<String>,
    sample_seen: bool,
}

/// Validates OpenMetrics text expositions.
///
/// One instance validates a sequence of expositions from the same endpoint:
/// each [`validate`](Validator::validate) call checks the exposition's
/// intra-exposition rules and compares it against the previous call's metric
/// set (counter monotonicity, timestamp monotonicity, series persistence).
/// Errors accumulate across calls until [`reset`](Validator::reset).
///
/// A `Validator` is synchronous and not safe for concurrent use; create one
/// instance per thread.
pub struct Validator {
    level: ErrorLevel,
    current: MetricSet,
    previous: MetricSet,
    last_family_name: Option<String>,
    seen_label_sets: HashSet<String>,
    last_label_set: Option<LabelSet>,
    errors: Vec<ValidationError>,
    now: NowFn,
}

impl Validator {
    /// Creates a validator reporting violations at or above `level`.
    pub fn new(level: ErrorLevel) -> Validator {
        Validator {
            level,
            current: MetricSet::new(),
            previous: MetricSet::new(),
            last_family_name: None,
            seen_label_sets: HashSet::new(),
            last_label_set: None,
            errors: Vec::new(),
            now: Box::new(system_now),
        }
    }

    /// Replaces the source of default sample timestamps.
    pub fn with_now_fn(mut self, now: NowFn) -> Validator {
        self.now = now;
        self
    }

    /// Clears accumulated errors and both metric sets.
    ///
    /// Required after a `validate` call that reported a parse error: a
    /// partially consumed exposition must not poison comparisons against
    /// later scrapes.
    pub fn reset(&mut self) {
        self.current = MetricSet::new();
        self.previous = MetricSet::new();
        self.last_family_name = None;
        self.seen_label_sets.clear();
        self.last_label_set = None;
        self.errors.clear();
    }

    /// Validates one exposition.
    ///
    /// On a parse error, validation of the exposition stops and the current
    /// set is *not* rolled forward; callers should [`reset`](Self::reset)
    /// before validating further expositions.  Otherwise the full rule
    /// catalog runs and the current set becomes the baseline for the next
    /// call.  Returns every accumulated error at or above the configured
    /// severity threshold.
    pub fn validate(&mut self, input: &[u8]) -> Result<(), ValidationErrors> {
        let mut parser = match Parser::new(input) {
            Ok(parser) => parser,
            Err(err) => {
                self.errors.push(err.into());
                return self.report();
            }
        };
        let default_timestamp = (self.now)();
        let mut tracker = MetadataTracker::default();
        loop {
            match parser.next_entry() {
                Err(err) => {
                    self.errors.push(err.into());
                    return self.report();
                }
                Ok(Entry::Eof) => {
                    self.finalize();
                    return self.report();
                }
                Ok(Entry::Type { name, kind }) => self.record_type(name, kind, &mut tracker),
                Ok(Entry::Help { name, text }) => self.record_help(name, text, &mut tracker),
                Ok(Entry::Unit { name, text }) => self.record_unit(name, text, &mut tracker),
                Ok(Entry::Comment) => {}
                Ok(Entry::Series(series)) => {
                    self.record_series(series, default_timestamp);
                    tracker.sample_seen = true;
                }
            }
        }
    }

    fn report(&self) -> Result<(), ValidationErrors> {
        let reported: Vec<ValidationError> =
            self.errors.iter().filter(|e| e.level() >= self.level).cloned().collect();
        if reported.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::from(reported))
        }
    }

    fn push_metric_error(&mut self, metric: &Metric, violation: Violation) {
        self.errors.push(ValidationError::Metric { metric: metric.to_string(), violation });
    }

    fn push_family_error(&mut self, family: &str, violation: Violation) {
        self.errors.push(ValidationError::MetricFamily { family: family.to_string(), violation });
    }

    /// Resolves or creates the family, flagging interleaving: touching an
    /// already-created family after a different family was touched is an
    /// ordering violation.
    fn add_or_get_family(&mut self, name: &str) -> &mut MetricFamily {
        if !self.current.families.contains_key(name) {
            self.last_label_set = None;
            self.seen_label_sets.clear();
        } else if self.last_family_name.as_deref().is_some_and(|last| last != name) {
            self.push_family_error(name, Violation::FamiliesInterleaved);
        }
        self.last_family_name = Some(name.to_string());
        self.current.families.entry(name.to_string()).or_default()
    }

    fn track_metadata(&mut self, tracker: &mut MetadataTracker, name: &str) {
        if tracker.sample_seen {
            // Samples of the previous family have been recorded; this
            // metadata line starts a new family.
            tracker.sample_seen = false;
            tracker.name = Some(name.to_string());
            return;
        }
        if let Some(previous) = &tracker.name {
            if previous != name {
                let violation = Violation::MetricNameChanged {
                    from: previous.clone(),
                    to: name.to_string(),
                };
                let family = previous.clone();
                self.push_family_error(&family, violation);
                return;
            }
        }
        tracker.name = Some(name.to_string());
    }

    fn record_type(&mut self, name: String, kind: MetricKind, tracker: &mut MetadataTracker) {
        let already_set = {
            let family = self.add_or_get_family(&name);
            if family.kind.is_some() {
                true
            } else {
                family.kind = Some(kind);
                false
            }
        };
        if already_set {
            self.push_family_error(&name, Violation::TypeAlreadySet);
            return;
        }
        self.track_metadata(tracker, &name);
    }

    fn record_help(&mut self, name: String, text: String, tracker: &mut MetadataTracker) {
        let already_set = {
            let family = self.add_or_get_family(&name);
            if family.help.is_some() {
                true
            } else {
                family.help = Some(text);
                false
            }
        };
        if already_set {
            self.push_family_error(&name, Violation::HelpAlreadySet);
            return;
        }
        self.track_metadata(tracker, &name);
    }

    fn record_unit(&mut self, name: String, text: String, tracker: &mut MetadataTracker) {
        let already_set = {
            let family = self.add_or_get_family(&name);
            if family.unit.is_some() {
                true
            } else {
                family.unit = Some(text);
                false
            }
        };
        if already_set {
            self.push_family_error(&name, Violation::UnitAlreadySet);
            return;
        }
        self.track_metadata(tracker, &name);
    }

    fn record_series(&mut self, series: Series, default_timestamp: i64) {
        let Series { name, labels, value, timestamp, exemplar } = series;
        let family_name = self.current.classify(&name).to_string();
        let with_timestamp = timestamp.is_some();
        let metric = Metric {
            name,
            labels,
            timestamp: timestamp.unwrap_or(default_timestamp),
            value,
            exemplar,
        };

        let (kind, first_occurrence) = {
            let family = self.add_or_get_family(&family_name);
            family.set_default_metadata();
            if with_timestamp {
                family.with_timestamp = true;
            } else {
                family.without_timestamp = true;
            }
            family.by_appearance.push(metric.clone());
            let kind = family.effective_kind();
            let key = metric.key();
            let first_occurrence = match family.metrics.get(&key) {
                Some(first) => Some(first.clone()),
                None => {
                    family.metrics.insert(key, metric.clone());
                    None
                }
            };
            (kind, first_occurrence)
        };

        self.validate_sample(kind, &metric);
        self.check_label_adjacency(&family_name, kind, &metric);
        if let Some(first) = first_occurrence {
            self.compare_samples(kind, &first, &metric, TimestampOrder::StrictlyIncreasing);
        }
    }

    /// Flags a sample whose (filtered) label set was already seen in this
    /// family but is not the immediately preceding one: series of a family
    /// must be exposed contiguously.
    fn check_label_adjacency(&mut self, family_name: &str, kind: MetricKind, metric: &Metric) {
        let ignored = ignored_labels(&metric.name, family_name, kind);
        let filtered = metric.labels.without(ignored);
        let fingerprint = filtered.to_string();
        let seen = self.seen_label_sets.contains(&fingerprint);
        if let Some(last) = &self.last_label_set {
            if *last != filtered && seen {
                self.push_metric_error(metric, Violation::FamiliesInterleaved);
            }
        }
        self.last_label_set = Some(filtered);
        self.seen_label_sets.insert(fingerprint);
    }

    fn validate_sample(&mut self, kind: MetricKind, metric: &Metric) {
        let name = metric.name.as_str();
        let value = metric.value;
        match kind {
            MetricKind::Counter => {
                if name.ends_with("_total") && (value.is_nan() || value < 0.0) {
                    self.push_metric_error(metric, Violation::CounterValueInvalid);
                }
            }
            MetricKind::Histogram => {
                if (name.ends_with("_count")
                    || name.ends_with("_sum")
                    || name.ends_with("_bucket"))
                    && (value.is_nan() || value < 0.0)
                {
                    self.push_metric_error(metric, Violation::CounterValueInvalid);
                }
            }
            MetricKind::GaugeHistogram => {
                if name.ends_with("_bucket") && (value.is_nan() || value < 0.0) {
                    self.push_metric_error(metric, Violation::GaugeHistogramBucketValueInvalid);
                } else if name.ends_with("_gsum") && value.is_nan() {
                    self.push_metric_error(metric, Violation::GaugeHistogramGSumNaN);
                }
            }
            MetricKind::Summary => {
                if (name.ends_with("_count") || name.ends_with("_sum"))
                    && (value.is_nan() || value < 0.0)
                {
                    self.push_metric_error(metric, Violation::CounterValueInvalid);
                }
            }
            MetricKind::Info => {
                if value != 1.0 {
                    self.push_metric_error(metric, Violation::InfoValueNotOne);
                }
            }
            MetricKind::Stateset => {
                if value != 0.0 && value != 1.0 {
                    self.push_metric_error(metric, Violation::StateSetValueInvalid);
                }
            }
            MetricKind::Gauge | MetricKind::Unknown => {}
        }

        self.validate_exemplar(kind, metric);
    }

    fn validate_exemplar(&mut self, kind: MetricKind, metric: &Metric) {
        let Some(exemplar) = &metric.exemplar else { return };
        if !matches!(
            kind,
            MetricKind::Counter | MetricKind::Histogram | MetricKind::GaugeHistogram
        ) {
            self.push_metric_error(metric, Violation::ExemplarNotAllowed);
            return;
        }
        let total = exemplar.labels.char_len();
        if total > EXEMPLAR_MAX_LABEL_SET_LENGTH {
            self.push_metric_error(metric, Violation::ExemplarLabelsTooLong(total));
        }
    }

    /// Pairwise comparison of two samples of the same series, within one
    /// exposition or across two successive expositions.
    fn compare_samples(
        &mut self,
        kind: MetricKind,
        last: &Metric,
        cur: &Metric,
        order: TimestampOrder,
    ) {
        let out_of_order = match order {
            TimestampOrder::StrictlyIncreasing => cur.timestamp <= last.timestamp,
            TimestampOrder::NonDecreasing => cur.timestamp < last.timestamp,
        };
        if out_of_order {
            self.push_metric_error(cur, Violation::TimestampNotIncreasing);
        }
        if kind == MetricKind::Counter && cur.value < last.value {
            self.push_metric_error(cur, Violation::CounterValueDecreased);
        }
    }

    /// Runs at `# EOF`: label hygiene, per-family rules, comparison against
    /// the previous exposition, then the current set rolls forward.
    fn finalize(&mut self) {
        self.validate_label_hygiene();

        let family_names: Vec<String> = self.current.families.keys().cloned().collect();
        for name in &family_names {
            self.validate_family(name);
        }

        self.compare_with_previous();

        let mut current = std::mem::take(&mut self.current);
        for family in current.families.values_mut() {
            family.reset_after_validate();
        }
        self.previous = current;
    }

    /// Set-wide label checks: unique names within each label set, and no
    /// single (name, value) pair shared by every sample of the set.
    fn validate_label_hygiene(&mut self) {
        let mut duplicates: Vec<Metric> = Vec::new();
        let mut shared: Option<LabelSet> = None;
        let mut samples = 0usize;
        for family in self.current.families.values() {
            for metric in family.metrics.values() {
                if metric.labels.has_duplicate_names() {
                    duplicates.push(metric.clone());
                }
                samples += 1;
                shared = Some(match shared {
                    None => metric.labels.clone(),
                    Some(acc) => acc.shared_pairs(&metric.labels),
                });
            }
        }
        for metric in &duplicates {
            self.push_metric_error(metric, Violation::DuplicateLabelNames);
        }
        if samples > 1 && shared.is_some_and(|s| !s.is_empty()) {
            self.errors.push(ValidationError::Exposition(Violation::DuplicateLabelOnAllMetrics));
        }
    }

    fn validate_family(&mut self, name: &str) {
        let family = {
            let Some(family) = self.current.families.get_mut(name) else { return };
            family.set_default_metadata();
            family.clone()
        };

        if family.with_timestamp && family.without_timestamp {
            self.push_family_error(name, Violation::MixedTimestampPresence);
        }

        match family.effective_kind() {
            // Counter sample values were checked as they were recorded.
            MetricKind::Counter | MetricKind::Gauge | MetricKind::Unknown => {}
            MetricKind::Histogram => {
                if !family.by_appearance.is_empty() {
                    self.validate_histogram_family(name, &family);
                }
            }
            MetricKind::GaugeHistogram => {
                if !family.by_appearance.is_empty() {
                    self.validate_gauge_histogram_family(name, &family);
                }
            }
            MetricKind::Summary => self.validate_summary_family(&family),
            MetricKind::Info => {
                if family.unit.as_deref().is_some_and(|unit| !unit.is_empty()) {
                    self.push_family_error(name, Violation::UnitForInfo);
                }
            }
            MetricKind::Stateset => {
                if family.unit.as_deref().is_some_and(|unit| !unit.is_empty()) {
                    self.push_family_error(name, Violation::UnitForStateSet);
                }
                for metric in family.metrics.values() {
                    if !metric.labels.has(name) {
                        self.push_metric_error(metric, Violation::StateSetMissingLabel);
                    }
                }
            }
        }
    }

    fn validate_summary_family(&mut self, family: &MetricFamily) {
        for metric in family.metrics.values() {
            let name = metric.name.as_str();
            if name.ends_with("_count") || name.ends_with("_sum") {
                if metric.value.is_nan() || metric.value < 0.0 {
                    self.push_metric_error(metric, Violation::SummaryCountSumInvalid);
                }
                continue;
            }
            if name.ends_with("_created") {
                continue;
            }
            // Samples with an empty suffix are expected to be quantiles.
            if metric.value < 0.0 {
                self.push_metric_error(metric, Violation::QuantileValueNegative);
            }
            let raw = metric.labels.get("quantile").unwrap_or("");
            match raw.parse::<f64>() {
                Err(_) => {
                    self.push_metric_error(metric, Violation::InvalidQuantileLabel(raw.to_string()));
                }
                Ok(quantile) => {
                    if quantile.is_nan() || !(0.0..=1.0).contains(&quantile) {
                        self.push_metric_error(metric, Violation::QuantileOutOfRange);
                    }
                }
            }
        }
    }

    /// Collects the family's bucket samples in exposition order, keyed by
    /// their parsed `le` threshold.  Flags unparsable thresholds and records
    /// whether a `+Inf` or negative threshold was present.
    fn collect_buckets(
        &mut self,
        family: &MetricFamily,
        skip: impl Fn(&str) -> bool,
        found_inf: &mut bool,
        found_negative: &mut bool,
    ) -> Vec<(f64, Metric)> {
        let mut buckets = Vec::new();
        for metric in &family.by_appearance {
            if skip(metric.name.as_str()) {
                continue;
            }
            let raw = metric.labels.get("le").unwrap_or("");
            if raw == "+Inf" {
                *found_inf = true;
                buckets.push((f64::INFINITY, metric.clone()));
                continue;
            }
            match raw.parse::<f64>() {
                Err(_) => {
                    let violation = Violation::InvalidBucketLabel(raw.to_string());
                    self.push_metric_error(metric, violation);
                }
                Ok(le) => {
                    if le < 0.0 {
                        *found_negative = true;
                    }
                    buckets.push((le, metric.clone()));
                }
            }
        }
        buckets
    }

    fn validate_histogram_family(&mut self, name: &str, family: &MetricFamily) {
        let mut sum_found = false;
        let mut count_found = false;
        for metric in &family.by_appearance {
            if metric.name.ends_with("_sum") {
                sum_found = true;
            } else if metric.name.ends_with("_count") {
                count_found = true;
            }
        }

        let mut inf_found = false;
        let mut negative_bucket_found = false;
        let buckets = self.collect_buckets(
            family,
            |n| n.ends_with("_sum") || n.ends_with("_count") || n.ends_with("_created"),
            &mut inf_found,
            &mut negative_bucket_found,
        );

        let sorted = buckets.windows(2).all(|w| !(w[1].0 < w[0].0));
        if !sorted {
            self.push_family_error(name, Violation::HistogramBucketsOutOfOrder);
        } else {
            // Buckets count everything at or below their threshold, so their
            // values must be non-decreasing; a NaN fails the comparison and
            // is reported as out of order.
            for window in buckets.windows(2) {
                let (last, cur) = (&window[0], &window[1]);
                if !(last.1.value <= cur.1.value) {
                    let violation = Violation::BucketValueOutOfOrder {
                        le: cur.0,
                        last: last.1.value,
                        cur: cur.1.value,
                    };
                    let metric = cur.1.clone();
                    self.push_metric_error(&metric, violation);
                    break;
                }
            }
        }

        if !inf_found {
            self.push_family_error(name, Violation::MissingPositiveInfBucket);
        }
        if sum_found != count_found {
            self.push_family_error(name, Violation::SumCountCoupling);
        }
        if sum_found && negative_bucket_found {
            self.push_family_error(name, Violation::SumWithNegativeBuckets);
        }
    }

    fn validate_gauge_histogram_family(&mut self, name: &str, family: &MetricFamily) {
        let mut gsum_found = false;
        let mut gcount_found = false;
        let mut negative_gsum_found = false;
        for metric in &family.by_appearance {
            if metric.name.ends_with("_gsum") {
                gsum_found = true;
                if metric.value < 0.0 {
                    negative_gsum_found = true;
                }
            } else if metric.name.ends_with("_gcount") {
                gcount_found = true;
            }
        }

        let mut inf_found = false;
        let mut negative_bucket_found = false;
        let buckets = self.collect_buckets(
            family,
            |n| n.ends_with("_gsum") || n.ends_with("_gcount"),
            &mut inf_found,
            &mut negative_bucket_found,
        );

        let sorted = buckets.windows(2).all(|w| !(w[1].0 < w[0].0));
        if !sorted {
            self.push_family_error(name, Violation::GaugeHistogramBucketsOutOfOrder);
        }

        if !inf_found {
            self.push_family_error(name, Violation::MissingPositiveInfBucket);
        }
        if negative_gsum_found && !negative_bucket_found {
            self.push_family_error(name, Violation::NegativeGSumWithNonNegativeBuckets);
        }
        if gsum_found != gcount_found {
            self.push_family_error(name, Violation::GSumGCountCoupling);
        }
    }

    /// Inter-exposition comparison: every series of the previous exposition
    /// must still be present, and shared series must keep timestamps and
    /// counter values non-decreasing.
    fn compare_with_previous(&mut self) {
        enum Pending {
            Disappeared(String),
            Compare(MetricKind, Metric, Metric),
        }

        let previous = std::mem::take(&mut self.previous);
        let mut pending = Vec::new();
        for (name, last_family) in &previous.families {
            let Some(cur_family) = self.current.families.get(name) else {
                pending.push(Pending::Disappeared(name.clone()));
                continue;
            };
            let kind = cur_family.effective_kind();
            for (key, last_metric) in &last_family.metrics {
                match cur_family.metrics.get(key) {
                    Some(cur_metric) => pending.push(Pending::Compare(
                        kind,
                        last_metric.clone(),
                        cur_metric.clone(),
                    )),
                    None => pending.push(Pending::Disappeared(name.clone())),
                }
            }
        }
        for item in pending {
            match item {
                Pending::Disappeared(name) => {
                    self.push_family_error(&name, Violation::SeriesDisappeared);
                }
                Pending::Compare(kind, last, cur) => {
                    self.compare_samples(kind, &last, &cur, TimestampOrder::NonDecreasing);
                }
            }
        }
    }
}

/// Labels that do not identify a series on their own and are excluded from
/// adjacency fingerprints: the bucket threshold of (gauge) histograms and
/// the quantile of summaries.
fn ignored_labels(sample_name: &str, family_name: &str, kind: MetricKind) -> &'static [&'static str] {
    match kind {
        MetricKind::Histogram | MetricKind::GaugeHistogram
            if sample_name.ends_with("_bucket") =>
        {
            &["le"]
        }
        MetricKind::Summary if sample_name == family_name => &["quantile"],
        _ => &[],
    }
}
