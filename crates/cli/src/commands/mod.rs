//! CLI command implementations

mod app;
mod index;
mod notes;
mod run;
mod search;

pub use app::{App, GlobalArgs};
pub use index::cmd_index;
pub use notes::{cmd_recent, cmd_show};
pub use run::cmd_run;
pub use search::{cmd_search, cmd_stats};

/// Human-readable age for a number of seconds
pub(crate) fn format_age(secs: f64) -> String {
  let secs = secs.max(0.0) as u64;
  match secs {
    0..60 => format!("{secs}s ago"),
    60..3_600 => format!("{}m ago", secs / 60),
    3_600..86_400 => format!("{}h ago", secs / 3_600),
    _ => format!("{}d ago", secs / 86_400),
  }
}
