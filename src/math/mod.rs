//! Integer geometry helpers

pub mod int_box;

pub use int_box::IntBox;
