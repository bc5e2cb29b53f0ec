//! Milestoning: temporal classes, their generated properties, and the
//! propagation of dates through call chains.

pub mod catalog;
pub mod propagate;
