use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("invalid file name")]
    InvalidName,

    #[error("file already exists")]
    AlreadyExists,

    #[error("file not found")]
    NotFound,

    #[error("file is already open")]
    AlreadyOpen,

    #[error("no free descriptor")]
    NoFreeDescriptor,

    #[error("no free data block")]
    DiskFull,

    #[error("no room in the directory")]
    DirectoryFull,

    #[error("no free open-file slot")]
    OftFull,

    #[error("invalid open-file slot: {0}")]
    BadSlot(usize),

    #[error("seek position {0} is at or past end of file")]
    SeekOutOfBounds(usize),

    #[error("malformed disk image: {0}")]
    BadImage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
