
// Mark the crate as no_std if the feature is enabled (and only)
#![cfg_attr(all(feature = "no_std", not(test)), no_std)]

#[allow(unused_extern_crates)]
extern crate core; // makes rls actually look into the standard library (hack)

macro_rules! using_std { ($($i:item)*) => ($(#[cfg(not(feature = "no_std"))]$i)*) }

pub mod error;
pub mod storage;

pub mod util;

pub mod mfm;
pub mod fat;
pub mod fs;

pub use error::Error;
pub use fs::{FloppyFs, Mode};
pub use storage::{Sector, SectorIo, Track};
