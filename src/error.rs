use thiserror::Error;

#[derive(Error, Debug)]
pub enum FatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed boot sector: {0}")]
    MalformedHeader(String),

    #[error("Cluster {cluster} is out of range (volume has {total} clusters)")]
    ClusterOutOfRange { cluster: u32, total: u32 },

    #[error("Volume is not writable")]
    VolumeNotWritable,

    #[error("Cluster {cluster} does not look like a directory")]
    DirectoryRejected { cluster: u32 },

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, FatError>;

impl FatError {
    /// Map an I/O error raised by a write into the volume.
    pub(crate) fn from_write(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            FatError::VolumeNotWritable
        } else {
            FatError::Io(e)
        }
    }
}
