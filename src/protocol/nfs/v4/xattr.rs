//! Extended attribute operations (RFC 8276): GETXATTR, SETXATTR,
//! LISTXATTRS, REMOVEXATTR.
//!
//! Names cross the wire without a namespace; the server scopes them into
//! the `user.` namespace before talking to the backend, and strips the
//! prefix again when listing. Mutations bump the object's modification
//! time through the monotone clock so the `change` attribute reflects the
//! xattr update.

use anyhow::Error;
use tracing::trace;

use super::{discard_on_fault, Compound};
use crate::bufpool::Buf;
use crate::clock;
use crate::protocol::xdr::nfs4::{
    self, change_info4, nfsstat4, GETXATTR4args, GETXATTR4resok, LISTXATTRS4args,
    LISTXATTRS4resok, REMOVEXATTR4args, REMOVEXATTR4resok, SETXATTR4args, SETXATTR4resok,
};
use crate::protocol::xdr::{deserialize, Serialize};

/// Backend namespace for client-visible extended attributes.
const ATTR_PREFIX: &str = "user.";

impl Compound<'_> {
    pub(super) async fn getxattr(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<GETXATTR4args>(input)?;

        trace!("GETXATTR {}", args.name);

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_GETXATTR, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let info = match self.cached_stat(&fs, &current).await {
            Ok(info) => info,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_GETXATTR, err.status());
            }
        };

        match info.extended.get(&format!("{ATTR_PREFIX}{}", args.name)) {
            Some(value) => {
                let status = self.op_status(out, nfs4::OP4_GETXATTR, nfsstat4::NFS4_OK)?;
                GETXATTR4resok { value: value.clone() }.serialize(out)?;
                Ok(status)
            }
            None => self.op_status(out, nfs4::OP4_GETXATTR, nfsstat4::NFS4ERR_NOXATTR),
        }
    }

    pub(super) async fn setxattr(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<SETXATTR4args>(input)?;

        trace!("SETXATTR {}", args.name);

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_SETXATTR, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let info = match fs.fs().lstat(&current.path).await {
            Ok(info) => info,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_SETXATTR, err.status());
            }
        };

        let name = format!("{ATTR_PREFIX}{}", args.name);

        if let Err(err) = fs.fs().set_extended_attr(&current.path, &name, &args.value).await {
            return self.op_status(out, nfs4::OP4_SETXATTR, err.status());
        }

        // Advance mtime so the derived change value moves.
        let now = clock::must_increment(info.mtime);
        let _ = fs.fs().chtimes(&current.path, now, now).await;

        fs.cache.invalidate(&current.handle);

        let status = self.op_status(out, nfs4::OP4_SETXATTR, nfsstat4::NFS4_OK)?;
        SETXATTR4resok { cinfo: change_info4::default() }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn listxattrs(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<LISTXATTRS4args>(input)?;

        trace!("LISTXATTRS");

        // The whole list always fits one reply; any nonzero cookie resumes
        // past the end.
        if args.cookie > 0 {
            let status = self.op_status(out, nfs4::OP4_LISTXATTRS, nfsstat4::NFS4_OK)?;
            LISTXATTRS4resok { cookie: 1, names: Vec::new(), eof: true }.serialize(out)?;
            return Ok(status);
        }

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_LISTXATTRS, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let info = match self.cached_stat(&fs, &current).await {
            Ok(info) => info,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_LISTXATTRS, err.status());
            }
        };

        let names: Vec<String> = info
            .extended
            .keys()
            .map(|name| name.strip_prefix(ATTR_PREFIX).unwrap_or(name).to_string())
            .collect();

        let status = self.op_status(out, nfs4::OP4_LISTXATTRS, nfsstat4::NFS4_OK)?;
        LISTXATTRS4resok { cookie: 1, names, eof: true }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn removexattr(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<REMOVEXATTR4args>(input)?;

        trace!("REMOVEXATTR {}", args.name);

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_REMOVEXATTR, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let info = match fs.fs().lstat(&current.path).await {
            Ok(info) => info,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_REMOVEXATTR, err.status());
            }
        };

        let name = format!("{ATTR_PREFIX}{}", args.name);

        if let Err(err) = fs.fs().unset_extended_attr(&current.path, &name).await {
            return self.op_status(out, nfs4::OP4_REMOVEXATTR, err.status());
        }

        let now = clock::must_increment(info.mtime);
        let _ = fs.fs().chtimes(&current.path, now, now).await;

        fs.cache.invalidate(&current.handle);

        let status = self.op_status(out, nfs4::OP4_REMOVEXATTR, nfsstat4::NFS4_OK)?;
        REMOVEXATTR4resok { cinfo: change_info4::default() }.serialize(out)?;

        Ok(status)
    }
}
