pub mod error;
pub mod line_index;
pub mod package;
