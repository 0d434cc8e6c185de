//! Filesystem seam used for reading entry metadata and writing outputs.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Options applied when creating an output file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Permission bits. `None` leaves the platform default.
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,

    /// Permission bits (`st_mode & 0o7777`); `None` where unsupported.
    pub mode: Option<u32>,
}

/// Sink returned by [`FileSystem::create_write_stream`].
///
/// Callers must `shutdown()` the writer to be sure all data reached the file.
pub type FileWriter = Pin<Box<dyn AsyncWrite + Send>>;

#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Create a directory and all missing parents.
    async fn mkdirp(&self, dir: &Path) -> io::Result<()>;

    async fn stat(&self, path: &Path) -> io::Result<FileMetadata>;

    async fn create_write_stream(&self, path: &Path, options: WriteOptions)
    -> io::Result<FileWriter>;

    async fn write_file(&self, path: &Path, contents: &[u8], options: WriteOptions)
    -> io::Result<()>;
}

/// The local disk, through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFileSystem;

impl NativeFileSystem {
    async fn open(path: &Path, options: WriteOptions) -> io::Result<tokio::fs::File> {
        let mut open = tokio::fs::OpenOptions::new();
        open.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if let Some(mode) = options.mode {
            open.mode(mode);
        }

        let file = open.open(path).await?;
        // Creation mode is filtered by the umask and ignored for existing files.
        #[cfg(unix)]
        if let Some(mode) = options.mode {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(mode))
                .await?;
        }
        #[cfg(not(unix))]
        let _ = options;

        Ok(file)
    }
}

#[async_trait]
impl FileSystem for NativeFileSystem {
    async fn mkdirp(&self, dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await
    }

    async fn stat(&self, path: &Path) -> io::Result<FileMetadata> {
        let metadata = tokio::fs::metadata(path).await?;

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode() & 0o7777)
        };
        #[cfg(not(unix))]
        let mode = None;

        Ok(FileMetadata {
            size: metadata.len(),
            mode,
        })
    }

    async fn create_write_stream(
        &self,
        path: &Path,
        options: WriteOptions,
    ) -> io::Result<FileWriter> {
        let file = Self::open(path, options).await?;
        Ok(Box::pin(file))
    }

    async fn write_file(
        &self,
        path: &Path,
        contents: &[u8],
        options: WriteOptions,
    ) -> io::Result<()> {
        let mut file = Self::open(path, options).await?;
        file.write_all(contents).await?;
        file.flush().await
    }
}

/// `path` with `.<extension>` appended to its file name.
pub fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}
