//! Shared helpers used by both the refresh pipeline and discovery.
//!
//! - **URL validation**: scheme and address policy applied before any outbound request
//! - **Text cleanup**: normalization of untrusted names pulled out of feeds and web pages
//! - **Cancellation**: deadline-bound child tokens for layered timeouts

mod cancel;
mod text;
mod url_validator;

pub use cancel::child_with_timeout;
pub use text::{clean_display_name, strip_control_chars};
pub use url_validator::{origin_of, validate_url, UrlValidationError};
