//! Virtual File System (VFS) module defining the interface between the NFS
//! server and the underlying file system implementations.
//!
//! This module provides:
//! - The core [`AdvancedLinkFs`] trait a storage backend implements to be
//!   exported over NFSv4
//! - Positional file and directory-listing handles
//! - The [`FsError`] taxonomy the server maps onto NFSv4 status codes
//!
//! The server addresses objects by path and by opaque filehandle. Handles
//! are produced by the backend, must stay stable for the lifetime of one
//! worker, and are treated as volatile by the protocol layer: clients are
//! told to re-resolve them across server reincarnation. Directory listing
//! is random access (`list_at` with an offset) so READDIR cookies can
//! resume an enumeration at an arbitrary position.
//!
//! All operations are asynchronous; a backend is free to block on real I/O
//! inside them. Errors outside the non-fatal set cause the owning worker to
//! be discarded and the backend to be re-instantiated on the next request.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::protocol::xdr::nfs4;

/// Errors a filesystem backend reports to the server.
///
/// The named variants are the non-fatal set: they map onto well-defined
/// NFSv4 status codes and leave the worker alive. Anything wrapped in
/// `Other` is treated as a backend fault: the operation answers
/// `NFS4ERR_SERVERFAULT` and the worker is discarded so the next request
/// starts from a fresh backend.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file already exists")]
    Exists,
    #[error("permission denied")]
    Permission,
    #[error("invalid argument")]
    Invalid,
    #[error("bad file handle")]
    BadDescriptor,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotDirectory,
    #[error("operation not supported")]
    Unsupported,
    #[error("end of file")]
    Eof,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FsError {
    /// The NFSv4 status an operation failing with this error reports.
    pub fn status(&self) -> nfs4::nfsstat4 {
        match self {
            FsError::NotFound => nfs4::nfsstat4::NFS4ERR_NOENT,
            FsError::Exists => nfs4::nfsstat4::NFS4ERR_EXIST,
            FsError::Permission => nfs4::nfsstat4::NFS4ERR_PERM,
            FsError::Invalid => nfs4::nfsstat4::NFS4ERR_INVAL,
            FsError::BadDescriptor => nfs4::nfsstat4::NFS4ERR_BADHANDLE,
            FsError::IsDirectory => nfs4::nfsstat4::NFS4ERR_ISDIR,
            FsError::NotDirectory => nfs4::nfsstat4::NFS4ERR_NOTDIR,
            FsError::Unsupported => nfs4::nfsstat4::NFS4ERR_NOTSUPP,
            FsError::Eof => nfs4::nfsstat4::NFS4ERR_IO,
            FsError::Other(_) => nfs4::nfsstat4::NFS4ERR_SERVERFAULT,
        }
    }

    /// True when this error is not in the non-fatal set and the worker that
    /// produced it must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Other(_))
    }
}

// Unix file type bits within `FileInfo::mode`.
pub const MODE_TYPE_MASK: u32 = 0o170000;
pub const MODE_SOCKET: u32 = 0o140000;
pub const MODE_SYMLINK: u32 = 0o120000;
pub const MODE_REGULAR: u32 = 0o100000;
pub const MODE_BLOCK: u32 = 0o060000;
pub const MODE_DIR: u32 = 0o040000;
pub const MODE_CHAR: u32 = 0o020000;
pub const MODE_FIFO: u32 = 0o010000;

/// Metadata for one filesystem object, as returned by [`AdvancedLinkFs::lstat`]
/// and by directory listers.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Base name, without any path components.
    pub name: String,
    pub size: u64,
    /// Unix mode: type bits in the upper octets, permissions below.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: SystemTime,
    /// Extended attributes, full names (including any namespace prefix).
    pub extended: HashMap<String, Vec<u8>>,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_DIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_SYMLINK
    }

    /// The `nfs_ftype4` value for this object. Unknown type bits are
    /// reported as a regular file.
    pub fn nfs_type(&self) -> u32 {
        match self.mode & MODE_TYPE_MASK {
            MODE_DIR => nfs4::NF4DIR,
            MODE_SYMLINK => nfs4::NF4LNK,
            MODE_SOCKET => nfs4::NF4SOCK,
            MODE_FIFO => nfs4::NF4FIFO,
            MODE_BLOCK => nfs4::NF4BLK,
            MODE_CHAR => nfs4::NF4CHR,
            _ => nfs4::NF4REG,
        }
    }

    /// The lower nine permission bits.
    pub fn perm(&self) -> u32 {
        self.mode & 0o777
    }
}

impl Default for FileInfo {
    fn default() -> Self {
        FileInfo {
            name: String::new(),
            size: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            nlink: 0,
            mtime: SystemTime::UNIX_EPOCH,
            extended: HashMap::new(),
        }
    }
}

/// Open disposition for [`AdvancedLinkFs::file_write`] and
/// [`AdvancedLinkFs::open_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub exclusive: bool,
    pub truncate: bool,
}

/// A positional read handle.
#[async_trait]
pub trait ReaderAt: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`. Returns the byte count
    /// and whether the end of the file was reached.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(usize, bool), FsError>;

    async fn close(&self) -> Result<(), FsError>;
}

/// A positional write handle.
#[async_trait]
pub trait WriterAt: Send + Sync {
    /// Writes `data` at `offset`, extending the file as needed.
    async fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError>;

    async fn close(&self) -> Result<(), FsError>;
}

/// A handle open for both positional reads and writes. Every entry in a
/// worker's open-file table is one of these; one-sided handles are adapted
/// with [`read_only`] and [`write_only`].
#[async_trait]
pub trait FileIo: Send + Sync {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(usize, bool), FsError>;

    async fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError>;

    async fn close(&self) -> Result<(), FsError>;
}

/// A random-access directory reader. `list_at` must return entries in a
/// stable order across calls so an enumeration can resume at any offset.
#[async_trait]
pub trait ListerAt: Send + Sync {
    /// Reads up to `max` entries starting at entry index `offset`. The
    /// boolean reports whether the returned batch exhausts the directory.
    async fn list_at(&self, offset: u64, max: usize) -> Result<(Vec<FileInfo>, bool), FsError>;

    async fn close(&self) -> Result<(), FsError>;
}

/// The filesystem contract the NFSv4 server core requires.
///
/// Objects are addressed by slash-separated absolute paths; `handle` and
/// `path` translate between paths and the opaque filehandles put on the
/// wire. A backend instance belongs to exactly one worker, which is keyed
/// by (session, uid): per-user views never share an instance.
#[async_trait]
pub trait AdvancedLinkFs: Send + Sync {
    /// Opaque handle for the object at `path`; stable for the lifetime of
    /// this instance.
    async fn handle(&self, path: &str) -> Result<Vec<u8>, FsError>;

    /// Inverse of [`AdvancedLinkFs::handle`]. `NotFound` and `Unsupported`
    /// are both surfaced to clients as `NFS4ERR_STALE`.
    async fn path(&self, handle: &[u8]) -> Result<String, FsError>;

    /// Metadata for `path` without following symlinks.
    async fn lstat(&self, path: &str) -> Result<FileInfo, FsError>;

    /// Opens a directory enumeration.
    async fn list(&self, path: &str) -> Result<Box<dyn ListerAt>, FsError>;

    /// Opens `path` for reading.
    async fn file_read(&self, path: &str) -> Result<Box<dyn ReaderAt>, FsError>;

    /// Opens `path` for writing with the given disposition.
    async fn file_write(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn WriterAt>, FsError>;

    /// Opens `path` for reading and writing; `mode` applies when the file
    /// is created.
    async fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Box<dyn FileIo>, FsError>;

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), FsError>;

    /// Creates a symlink at `path` pointing to `target`.
    async fn symlink(&self, target: &str, path: &str) -> Result<(), FsError>;

    async fn readlink(&self, path: &str) -> Result<String, FsError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    /// Removes a non-directory object.
    async fn remove(&self, path: &str) -> Result<(), FsError>;

    async fn rmdir(&self, path: &str) -> Result<(), FsError>;

    /// Creates a hard link at `to` for the object at `from`.
    async fn link(&self, from: &str, to: &str) -> Result<(), FsError>;

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError>;

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), FsError>;

    async fn chtimes(
        &self,
        path: &str,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<(), FsError>;

    async fn truncate(&self, path: &str, size: u64) -> Result<(), FsError>;

    async fn set_extended_attr(
        &self,
        path: &str,
        name: &str,
        value: &[u8],
    ) -> Result<(), FsError>;

    async fn unset_extended_attr(&self, path: &str, name: &str) -> Result<(), FsError>;

    /// Called exactly once, when the owning worker is destroyed.
    async fn close(&self) -> Result<(), FsError>;
}

/// Adapts a read handle to the open-file interface; writes are refused.
pub fn read_only(inner: Box<dyn ReaderAt>) -> Box<dyn FileIo> {
    Box::new(ReadOnlyFile { inner })
}

/// Adapts a write handle to the open-file interface; reads are refused.
pub fn write_only(inner: Box<dyn WriterAt>) -> Box<dyn FileIo> {
    Box::new(WriteOnlyFile { inner })
}

struct ReadOnlyFile {
    inner: Box<dyn ReaderAt>,
}

#[async_trait]
impl FileIo for ReadOnlyFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(usize, bool), FsError> {
        self.inner.read_at(buf, offset).await
    }

    async fn write_at(&self, _data: &[u8], _offset: u64) -> Result<usize, FsError> {
        Err(FsError::Permission)
    }

    async fn close(&self) -> Result<(), FsError> {
        self.inner.close().await
    }
}

struct WriteOnlyFile {
    inner: Box<dyn WriterAt>,
}

#[async_trait]
impl FileIo for WriteOnlyFile {
    async fn read_at(&self, _buf: &mut [u8], _offset: u64) -> Result<(usize, bool), FsError> {
        Err(FsError::Permission)
    }

    async fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        self.inner.write_at(data, offset).await
    }

    async fn close(&self) -> Result<(), FsError> {
        self.inner.close().await
    }
}

/// A filesystem that failed to load: every operation reports the original
/// load error as a backend fault. Standing in for a real backend keeps the
/// worker machinery uniform — the error surfaces as `NFS4ERR_SERVERFAULT`
/// and the worker is discarded, so the next request retries the load.
pub struct ErrorFs {
    message: String,
}

impl ErrorFs {
    pub fn new(err: anyhow::Error) -> Box<dyn AdvancedLinkFs> {
        Box::new(ErrorFs { message: err.to_string() })
    }

    fn err(&self) -> FsError {
        FsError::Other(anyhow::anyhow!("{}", self.message))
    }
}

#[async_trait]
impl AdvancedLinkFs for ErrorFs {
    async fn handle(&self, _path: &str) -> Result<Vec<u8>, FsError> {
        Err(self.err())
    }

    async fn path(&self, _handle: &[u8]) -> Result<String, FsError> {
        Err(self.err())
    }

    async fn lstat(&self, _path: &str) -> Result<FileInfo, FsError> {
        Err(self.err())
    }

    async fn list(&self, _path: &str) -> Result<Box<dyn ListerAt>, FsError> {
        Err(self.err())
    }

    async fn file_read(&self, _path: &str) -> Result<Box<dyn ReaderAt>, FsError> {
        Err(self.err())
    }

    async fn file_write(
        &self,
        _path: &str,
        _flags: OpenFlags,
    ) -> Result<Box<dyn WriterAt>, FsError> {
        Err(self.err())
    }

    async fn open_file(
        &self,
        _path: &str,
        _flags: OpenFlags,
        _mode: u32,
    ) -> Result<Box<dyn FileIo>, FsError> {
        Err(self.err())
    }

    async fn mkdir(&self, _path: &str, _mode: u32) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn symlink(&self, _target: &str, _path: &str) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn readlink(&self, _path: &str) -> Result<String, FsError> {
        Err(self.err())
    }

    async fn rename(&self, _from: &str, _to: &str) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn remove(&self, _path: &str) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn rmdir(&self, _path: &str) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn link(&self, _from: &str, _to: &str) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn chmod(&self, _path: &str, _mode: u32) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn chtimes(
        &self,
        _path: &str,
        _atime: SystemTime,
        _mtime: SystemTime,
    ) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn truncate(&self, _path: &str, _size: u64) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn set_extended_attr(
        &self,
        _path: &str,
        _name: &str,
        _value: &[u8],
    ) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn unset_extended_attr(&self, _path: &str, _name: &str) -> Result<(), FsError> {
        Err(self.err())
    }

    async fn close(&self) -> Result<(), FsError> {
        Ok(())
    }
}

/// Joins a directory path and a child name.
pub fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", base.trim_end_matches('/'))
    }
}

/// The parent directory of `path`; the root is its own parent.
pub fn parent(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
    }
}
