pub mod analysis;
pub mod display;
pub mod error;
pub mod fs;
pub mod logging;

pub use error::{FatError, Result};
pub use fs::{FatPath, FatVolume, OpenOptions};
