//! Site configuration and filesystem layout.
//!
//! - [`Settings`]: the `hoist.toml` schema, every field defaulted
//! - [`Environment`]: where a site's repository, history and locks live

pub mod parser;
pub mod paths;
pub mod schema;

pub use parser::{load_settings, parse_hoist_toml, parse_hoist_toml_str, to_toml};
pub use paths::Environment;
pub use schema::{BuildSettings, LockSettings, RetentionSettings, RetrySettings, Settings};
