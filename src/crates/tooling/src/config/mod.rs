//! Configuration helpers
//!
//! Environment variables override values loaded from the YAML settings file.
//! These helpers make the lookup explicit about the three outcomes: absent,
//! present and valid, present and invalid.

mod env;

pub use env::{get_env, get_env_bool, get_env_list, get_env_parse, prefixed_key};
