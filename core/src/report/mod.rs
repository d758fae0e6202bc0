//! Report rendering. Nothing in here prints; callers decide where the text goes.

pub mod markdown;
pub mod terminal;

pub use markdown::{render_diff, render_snapshot, render_summary};
pub use terminal::{render_suite, Palette};
