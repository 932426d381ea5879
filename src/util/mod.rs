//! Small helpers shared across the pipeline.
//!
//! - **URL validation**: SSRF checks applied to feed entry links before they
//!   are stored and again before content is fetched
//! - **Clock**: unix-seconds timestamp used for every stored time

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
