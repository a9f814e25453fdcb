//! Configuration for strata views and logging.
//!
//! Options arrive as loosely typed JSON (from an editor) or TOML (from a config file) and are
//! applied one at a time so a single bad value never discards the rest of a batch.

mod error;
mod logging;
mod options;

pub use error::{ConfigError, OptionError};
pub use logging::{init_tracing, LoggingConfig};
pub use options::{OptionResult, OptionResults, OptionState, Options};
