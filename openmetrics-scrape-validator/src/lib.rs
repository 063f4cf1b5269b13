//! Scrape-and-validate driver for OpenMetrics endpoints.
//!
//! [`ScrapeLoop`] periodically fetches an exposition over HTTP and hands the
//! body to an [`openmetrics_validator::Validator`], so that cross-scrape
//! rules such as counter monotonicity and series persistence are exercised
//! against a live endpoint.
#![deny(missing_docs)]
mod scrape;
pub use self::scrape::{HttpScraper, ScrapeError, ScrapeLoop, ScrapeLoopBuilder, Scraper};
