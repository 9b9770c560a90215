pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_proxy_url, validate_realtime_url};
