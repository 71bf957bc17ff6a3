//! Utility functions shared by the parser, the collection and the CLI.
//!
//! - **Text processing**: HTML entity decoding, tag stripping, terminal
//!   sanitizing and width-aware truncation
//! - **URL validation**: turning user input into a subscribable feed URL
//!
//! # Examples
//!
//! ```
//! use feedloom::util::{strip_tags, unescape_html};
//!
//! let text = strip_tags(&unescape_html("&lt;p&gt;Hello &amp; welcome&lt;/p&gt;"));
//! assert_eq!(text, "Hello & welcome");
//! ```

mod text;
mod url_validator;

pub use text::{strip_control_chars, strip_tags, truncate_to_width, unescape_html};
pub use url_validator::{validate_feed_url, UrlValidationError};
