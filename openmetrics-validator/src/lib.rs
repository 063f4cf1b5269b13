//! Validates metric expositions in the OpenMetrics text format.
//!
//! The entry point is [`Validator`], a long-lived object that consumes one
//! exposition per [`validate`](Validator::validate) call, checks it against
//! the intra-exposition rules of the OpenMetrics specification, and compares
//! it against the previous exposition to enforce cross-scrape invariants
//! such as counter monotonicity and series persistence.
//!
//! Rules come in two severities, `MUST` and `SHOULD`, selected via
//! [`ErrorLevel`]: validating at [`ErrorLevel::Must`] reports only `MUST`
//! violations, while [`ErrorLevel::Should`] reports both.  All violations
//! discovered in a call are reported together as [`ValidationErrors`] rather
//! than stopping at the first.
//!
//! A [`Validator`] is single-threaded and not safe for concurrent use; users
//! wanting parallelism should create one instance per thread.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(broken_intra_doc_links))]
mod errors;
pub use self::errors::{
    ErrorLevel, InvalidErrorLevel, ValidationError, ValidationErrors, Violation,
};

mod kind;
pub use self::kind::MetricKind;

mod label;
pub use self::label::{Label, LabelSet};

mod model;
pub use self::model::{Exemplar, EXEMPLAR_MAX_LABEL_SET_LENGTH};

pub mod parser;

mod suffix;

mod validator;
pub use self::validator::{NowFn, Validator};
