//! A library implementing common utitilies used throughout arbor.

mod assert;

pub mod slotmap;
