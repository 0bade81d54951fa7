//! Attribute operations: GETATTR, SETATTR, VERIFY, NVERIFY.
//!
//! GETATTR and the verify pair render attribute vectors with
//! [`super::encode_attrs`], preferring the worker's attribute cache.
//! SETATTR applies the writable subset (mode, owner, owner group, size,
//! modification time) and always advances the modification time through
//! the monotone clock so the derived `change` attribute moves even when
//! mutations land within the same wall-clock second.

use anyhow::Error;
use tracing::{trace, warn};

use super::{discard_on_fault, encode_attrs, Bitmap, Compound};
use crate::bufpool::Buf;
use crate::clock;
use crate::protocol::nfs::v4::attrs::{
    self, A_MODE, A_OWNER, A_OWNER_GROUP, A_SIZE, A_TIME_MODIFY,
};
use crate::protocol::xdr::nfs4::{self, fattr4, nfsstat4, GETATTR4args, GETATTR4resok};
use crate::protocol::xdr::{deserialize, Serialize};

impl Compound<'_> {
    pub(super) async fn getattr(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<GETATTR4args>(input)?;
        let requested = Bitmap::from_words(&args.attr_request);

        trace!("GETATTR {requested}");

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_GETATTR, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let info = match self.cached_stat(&fs, &current).await {
            Ok(info) => info,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_GETATTR, err.status());
            }
        };

        let attr = encode_attrs(
            &current.handle,
            &info,
            nfsstat4::NFS4_OK,
            &requested,
            &self.creds,
            fs.session_verifier,
        );

        let status = self.op_status(out, nfs4::OP4_GETATTR, nfsstat4::NFS4_OK)?;
        GETATTR4resok { obj_attributes: attr }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn setattr(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<nfs4::SETATTR4args>(input)?;

        trace!("SETATTR {}", Bitmap::from_words(&args.obj_attributes.attrmask));

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_SETATTR, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        fs.cache.invalidate(&current.handle);

        let decoded = match super::decode_attrs(&args.obj_attributes) {
            Ok(decoded) => decoded,
            Err(_) => return self.op_status(out, nfs4::OP4_SETATTR, nfsstat4::NFS4ERR_BADXDR),
        };

        if decoded == Default::default() {
            return self.op_status(out, nfs4::OP4_SETATTR, nfsstat4::NFS4ERR_ATTRNOTSUPP);
        }

        let mut changed: Vec<u32> = Vec::new();

        if let Some(mode) = decoded.mode {
            if let Err(err) = fs.fs().chmod(&current.path, mode).await {
                discard_on_fault(fs.shared(), &err);
                warn!("failed to chmod: {err}");
                return self.op_status(out, nfs4::OP4_SETATTR, err.status());
            }

            changed.push(A_MODE);
        }

        let mut uid = 0;
        let mut gid = 0;

        // Chown takes both ids; fill the unnamed half from the object.
        if decoded.owner.is_some() != decoded.owner_group.is_some() {
            let info = match fs.fs().lstat(&current.path).await {
                Ok(info) => info,
                Err(err) => {
                    discard_on_fault(fs.shared(), &err);
                    return self.op_status(out, nfs4::OP4_SETATTR, err.status());
                }
            };

            uid = info.uid;
            gid = info.gid;
        }

        if let Some(owner) = &decoded.owner {
            let Ok(parsed) = owner.parse::<u32>() else {
                warn!("failed to parse uid {owner:?}");
                return self.op_status(out, nfs4::OP4_SETATTR, nfsstat4::NFS4ERR_BADOWNER);
            };

            uid = parsed;
            changed.push(A_OWNER);
        }

        if let Some(group) = &decoded.owner_group {
            let Ok(parsed) = group.parse::<u32>() else {
                warn!("failed to parse gid {group:?}");
                return self.op_status(out, nfs4::OP4_SETATTR, nfsstat4::NFS4ERR_BADOWNER);
            };

            gid = parsed;
            changed.push(A_OWNER_GROUP);
        }

        if decoded.owner.is_some() || decoded.owner_group.is_some() {
            if let Err(err) = fs.fs().chown(&current.path, uid, gid).await {
                discard_on_fault(fs.shared(), &err);
                warn!("failed to chown: {err}");
                return self.op_status(out, nfs4::OP4_SETATTR, err.status());
            }
        }

        if let Some(size) = decoded.size {
            if let Err(err) = fs.fs().truncate(&current.path, size).await {
                discard_on_fault(fs.shared(), &err);
                warn!("failed to truncate: {err}");
                return self.op_status(out, nfs4::OP4_SETATTR, err.status());
            }

            changed.push(A_SIZE);
        }

        let mtime = match decoded.time_modify {
            Some(time) => attrs::system_time(time),
            None => clock::must_increment(clock::now()),
        };

        if let Err(err) = fs.fs().chtimes(&current.path, mtime, mtime).await {
            discard_on_fault(fs.shared(), &err);
            warn!("failed to set time: {err}");
            return self.op_status(out, nfs4::OP4_SETATTR, err.status());
        }

        changed.push(A_TIME_MODIFY);

        let status = self.op_status(out, nfs4::OP4_SETATTR, nfsstat4::NFS4_OK)?;
        Bitmap::from_ids(changed).words().serialize(out)?;

        Ok(status)
    }

    pub(super) async fn verify(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<fattr4>(input)?;

        trace!("VERIFY");

        match self.compare_attrs(out, nfs4::OP4_VERIFY, &args).await? {
            ComparedAttrs::Responded(status) => Ok(status),
            ComparedAttrs::Same => self.op_status(out, nfs4::OP4_VERIFY, nfsstat4::NFS4_OK),
            ComparedAttrs::Different => {
                self.op_status(out, nfs4::OP4_VERIFY, nfsstat4::NFS4ERR_NOT_SAME)
            }
        }
    }

    pub(super) async fn nverify(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<fattr4>(input)?;

        trace!("NVERIFY");

        match self.compare_attrs(out, nfs4::OP4_NVERIFY, &args).await? {
            ComparedAttrs::Responded(status) => Ok(status),
            ComparedAttrs::Same => self.op_status(out, nfs4::OP4_NVERIFY, nfsstat4::NFS4ERR_SAME),
            ComparedAttrs::Different => self.op_status(out, nfs4::OP4_NVERIFY, nfsstat4::NFS4_OK),
        }
    }

    /// Recomputes the attribute vector named by `args` and compares the
    /// values byte for byte.
    async fn compare_attrs(
        &mut self,
        out: &mut Buf,
        op: u32,
        args: &fattr4,
    ) -> Result<ComparedAttrs, Error> {
        let requested = Bitmap::from_words(&args.attrmask);

        for id in requested.ids() {
            if !attrs::supported(id) {
                let status = self.op_status(out, op, nfsstat4::NFS4ERR_ATTRNOTSUPP)?;
                return Ok(ComparedAttrs::Responded(status));
            }
        }

        let Some(current) = self.current_handle.clone() else {
            let status = self.op_status(out, op, nfsstat4::NFS4ERR_NOFILEHANDLE)?;
            return Ok(ComparedAttrs::Responded(status));
        };

        let fs = self.fs().await;

        let info = match self.cached_stat(&fs, &current).await {
            Ok(info) => info,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                let status = self.op_status(out, op, err.status())?;
                return Ok(ComparedAttrs::Responded(status));
            }
        };

        let ours = encode_attrs(
            &current.handle,
            &info,
            nfsstat4::NFS4_OK,
            &requested,
            &self.creds,
            fs.session_verifier,
        );

        if ours.attr_vals == args.attr_vals {
            Ok(ComparedAttrs::Same)
        } else {
            Ok(ComparedAttrs::Different)
        }
    }
}

enum ComparedAttrs {
    /// A status was already written; the comparison never ran.
    Responded(nfsstat4),
    Same,
    Different,
}
