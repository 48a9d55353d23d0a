#![allow(non_snake_case)]

mod engine;
mod error;
mod loader;
#[cfg(feature = "midi")]
mod midi_exporter;
#[cfg(feature = "midi")]
mod midi_importer;
mod model;
mod performer;
mod util;

pub use engine::*;
pub use error::*;
pub use loader::*;
#[cfg(feature = "midi")]
pub use midi_exporter::*;
#[cfg(feature = "midi")]
pub use midi_importer::*;
pub use model::config::*;
pub use model::map::*;
pub use model::performance::*;
pub use model::rendered::*;
pub use model::score::*;
pub use model::style::*;
pub use performer::*;
pub use util::*;
