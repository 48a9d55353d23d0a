pub mod config;
pub mod map;
pub mod performance;
pub mod rendered;
pub mod score;
pub mod style;
