//! Header documents: created from a template, then filled from the store.

mod filler;
mod generator;
mod template;

pub use filler::{merge, Creator, HeaderFiller};
pub use generator::HeaderGenerator;
pub use template::{EditionInfo, HeaderTemplate};

/// Today's date as written into `date[@type='modified']`.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
