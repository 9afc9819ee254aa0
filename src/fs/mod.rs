pub mod bytes;
pub mod directory;
pub mod entry;
pub mod fat;
pub mod file;
pub mod path;
pub mod table;
pub mod volume;

pub use directory::DirectoryListing;
pub use entry::DirectoryEntry;
pub use fat::{FatVolume, OpenOptions, VolumeInfo};
pub use file::LimitedWriter;
pub use path::FatPath;
pub use table::{END_OF_CHAIN, FREE_CLUSTER};
pub use volume::{FatLayout, FatType, VolumeDescriptor};

use std::fs::File;
use std::path::Path;

use crate::error::Result;

/// Open an image file as a FAT volume, read-write when `options.writable`.
pub fn open_image(path: &Path, options: OpenOptions) -> Result<FatVolume<File>> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(options.writable)
        .open(path)
        .map_err(|e| {
            if options.writable {
                crate::error::FatError::from_write(e)
            } else {
                e.into()
            }
        })?;
    FatVolume::open(file, options)
}
