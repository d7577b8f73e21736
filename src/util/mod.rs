//! Internal utilities.

pub(crate) mod slab;

pub(crate) use slab::{Slab, SlabKey};
