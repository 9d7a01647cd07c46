//! CLI entry point, grounded on the teacher's `Cli`/`Commands` shape -
//! global flags plus a subcommand enum, one module per command family.

mod commands;

pub use commands::{is_verbose, run, Cli};
