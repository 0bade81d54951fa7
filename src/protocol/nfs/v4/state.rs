//! Filehandle state operations: PUTROOTFH, PUTPUBFH, PUTFH, GETFH, SAVEFH,
//! RESTOREFH, LOOKUP, LOOKUPP and ACCESS.
//!
//! These maintain the current/saved filehandle pair the rest of a compound
//! operates on. Handles resolve through the worker's attribute cache when
//! possible, saving a backend round trip on the common PUTFH-GETATTR
//! pattern.

use anyhow::Error;
use tracing::trace;

use super::{discard_on_fault, Compound, FileHandle};
use crate::bufpool::Buf;
use crate::protocol::xdr::nfs4::{
    self, nfsstat4, ACCESS4args, ACCESS4resok, GETFH4resok, LOOKUP4args, PUTFH4args,
};
use crate::protocol::xdr::{deserialize, Serialize};
use crate::vfs::{self, FileInfo, FsError};
use crate::worker::{Entry, WorkerGuard};

impl Compound<'_> {
    /// File info for a handle, via the worker's attribute cache; a miss
    /// stats the backend and fills the cache.
    pub(super) async fn cached_stat(
        &self,
        fs: &WorkerGuard,
        handle: &FileHandle,
    ) -> Result<FileInfo, FsError> {
        if let Some(entry) = fs.cache.get(&handle.handle) {
            return Ok(entry.info);
        }

        let info = fs.fs().lstat(&handle.path).await?;

        fs.cache.put(&handle.handle, Entry { path: handle.path.clone(), info: info.clone() });

        Ok(info)
    }

    async fn put_root(&mut self, out: &mut Buf, op: u32) -> Result<nfsstat4, Error> {
        let fs = self.fs().await;

        let handle = match fs.fs().handle("/").await {
            Ok(handle) => handle,
            Err(err) => {
                // The root should always resolve.
                fs.shared().discard();
                return self.op_status(out, op, err.status());
            }
        };

        self.current_handle = Some(FileHandle { handle, path: "/".to_string() });

        self.op_status(out, op, nfsstat4::NFS4_OK)
    }

    pub(super) async fn putrootfh(&mut self, out: &mut Buf) -> Result<nfsstat4, Error> {
        trace!("PUTROOTFH");
        self.put_root(out, nfs4::OP4_PUTROOTFH).await
    }

    pub(super) async fn putpubfh(&mut self, out: &mut Buf) -> Result<nfsstat4, Error> {
        trace!("PUTPUBFH");
        self.put_root(out, nfs4::OP4_PUTPUBFH).await
    }

    pub(super) async fn putfh(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<PUTFH4args>(input)?;

        trace!("PUTFH {} bytes", args.object.len());

        let fs = self.fs().await;

        let path = match fs.cache.get(&args.object) {
            Some(entry) => entry.path,
            None => match fs.fs().path(&args.object).await {
                Ok(path) => path,
                Err(err) => {
                    discard_on_fault(fs.shared(), &err);

                    let status = match err {
                        FsError::Unsupported | FsError::NotFound => nfsstat4::NFS4ERR_STALE,
                        other => other.status(),
                    };

                    return self.op_status(out, nfs4::OP4_PUTFH, status);
                }
            },
        };

        self.current_handle = Some(FileHandle { handle: args.object, path });

        self.op_status(out, nfs4::OP4_PUTFH, nfsstat4::NFS4_OK)
    }

    pub(super) fn getfh(&mut self, out: &mut Buf) -> Result<nfsstat4, Error> {
        trace!("GETFH");

        let Some(current) = &self.current_handle else {
            return self.op_status(out, nfs4::OP4_GETFH, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let object = current.handle.clone();

        let status = self.op_status(out, nfs4::OP4_GETFH, nfsstat4::NFS4_OK)?;
        GETFH4resok { object }.serialize(out)?;

        Ok(status)
    }

    pub(super) fn savefh(&mut self, out: &mut Buf) -> Result<nfsstat4, Error> {
        trace!("SAVEFH");

        if self.current_handle.is_none() {
            return self.op_status(out, nfs4::OP4_SAVEFH, nfsstat4::NFS4ERR_NOFILEHANDLE);
        }

        self.saved_handle = self.current_handle.clone();

        self.op_status(out, nfs4::OP4_SAVEFH, nfsstat4::NFS4_OK)
    }

    pub(super) fn restorefh(&mut self, out: &mut Buf) -> Result<nfsstat4, Error> {
        trace!("RESTOREFH");

        if self.saved_handle.is_none() {
            return self.op_status(out, nfs4::OP4_RESTOREFH, nfsstat4::NFS4ERR_RESTOREFH);
        }

        self.current_handle = self.saved_handle.clone();

        self.op_status(out, nfs4::OP4_RESTOREFH, nfsstat4::NFS4_OK)
    }

    pub(super) async fn lookup(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<LOOKUP4args>(input)?;

        trace!("LOOKUP {}", args.objname);

        if args.objname.is_empty() {
            return self.op_status(out, nfs4::OP4_LOOKUP, nfsstat4::NFS4ERR_INVAL);
        }

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_LOOKUP, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let path = vfs::join(&current.path, &args.objname);

        let fs = self.fs().await;

        let handle = match fs.fs().handle(&path).await {
            Ok(handle) => handle,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_LOOKUP, err.status());
            }
        };

        self.current_handle = Some(FileHandle { handle, path });

        self.op_status(out, nfs4::OP4_LOOKUP, nfsstat4::NFS4_OK)
    }

    pub(super) async fn lookupp(&mut self, out: &mut Buf) -> Result<nfsstat4, Error> {
        trace!("LOOKUPP");

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_LOOKUPP, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        if current.path == "/" {
            return self.op_status(out, nfs4::OP4_LOOKUPP, nfsstat4::NFS4ERR_INVAL);
        }

        let path = vfs::parent(&current.path);

        let fs = self.fs().await;

        let handle = match fs.fs().handle(&path).await {
            Ok(handle) => handle,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_LOOKUPP, err.status());
            }
        };

        self.current_handle = Some(FileHandle { handle, path });

        self.op_status(out, nfs4::OP4_LOOKUPP, nfsstat4::NFS4_OK)
    }

    pub(super) async fn access(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<ACCESS4args>(input)?;

        trace!("ACCESS {:o}", args.access);

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_ACCESS, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let info = match self.cached_stat(&fs, &current).await {
            Ok(info) => info,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_ACCESS, err.status());
            }
        };

        let mut supported = nfs4::ACCESS4_READ
            | nfs4::ACCESS4_LOOKUP
            | nfs4::ACCESS4_MODIFY
            | nfs4::ACCESS4_EXTEND
            | nfs4::ACCESS4_DELETE
            | nfs4::ACCESS4_EXECUTE
            | nfs4::ACCESS4_XAREAD
            | nfs4::ACCESS4_XAWRITE
            | nfs4::ACCESS4_XALIST;

        // Owner permission bits stand in for a real access check.
        let perm = (info.mode >> 6) & 0b111;

        let mut access = 0;

        if perm & 0b100 != 0 {
            access |= nfs4::ACCESS4_READ
                | nfs4::ACCESS4_LOOKUP
                | nfs4::ACCESS4_XAREAD
                | nfs4::ACCESS4_XALIST;
        }

        if perm & 0b010 != 0 {
            access |= nfs4::ACCESS4_MODIFY
                | nfs4::ACCESS4_EXTEND
                | nfs4::ACCESS4_DELETE
                | nfs4::ACCESS4_XAWRITE;
        }

        if perm & 0b001 != 0 {
            access |= nfs4::ACCESS4_LOOKUP | nfs4::ACCESS4_EXECUTE;
        }

        supported &= args.access;
        access &= args.access;

        let status = self.op_status(out, nfs4::OP4_ACCESS, nfsstat4::NFS4_OK)?;
        ACCESS4resok { supported, access }.serialize(out)?;

        Ok(status)
    }
}
