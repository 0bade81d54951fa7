//! Open-file operations: OPEN, OPEN_DOWNGRADE, CLOSE, READ, WRITE, COMMIT.
//!
//! OPEN registers a backend file handle in the worker's table under a
//! random 64-bit file id and answers a stateid packing that id plus the
//! client's OPEN sequence id; READ, WRITE and CLOSE find the file through
//! the stateid and additionally require the compound's current filehandle
//! to match the one recorded at OPEN time. A replayed OPEN (same client,
//! same sequence id) answers the existing stateid without touching the
//! backend, and a replayed CLOSE of an already-closed id succeeds.

use anyhow::Error;
use tracing::{error, trace, warn};

use super::{discard_on_fault, file_id, file_other, Bitmap, Compound, FileHandle};
use crate::bufpool::{self, Buf};
use crate::protocol::nfs::v4::attrs::A_MODE;
use crate::protocol::xdr::nfs4::{
    self, change_info4, createhow4, nfsstat4, open_claim4, open_delegation4, openflag4, stateid4,
    CLOSE4args, COMMIT4args, COMMIT4resok, OPEN4args, OPEN4resok, OPEN_DOWNGRADE4args,
    READ4args, WRITE4args, WRITE4resok,
};
use crate::protocol::xdr::{deserialize, Serialize};
use crate::vfs::{read_only, write_only, FileIo, OpenFlags};
use crate::worker::File;

/// Upper bound on a single READ transfer, above the advertised maxread.
const MAX_READ_BUFFER: u32 = 1024 * 1024;

impl Compound<'_> {
    pub(super) async fn open(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let mut args = deserialize::<OPEN4args>(input)?;

        if self.minor_ver > 0 {
            // Sessions carry no open-owner seqids; synthesise a stable one
            // from the slot so replay detection still works.
            let (slot_id, sequence_id) = self.slot.unwrap_or((0, 0));
            args.owner.clientid = self.session_client_id();
            args.seqid = sequence_id.wrapping_mul(crate::clients::MAX_SLOT_ID).wrapping_add(slot_id);
        }

        trace!("OPEN {} {:?}", args.seqid, args.claim);

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let mut flags = OpenFlags::default();

        match args.share_access & nfs4::OPEN4_SHARE_ACCESS_BOTH {
            nfs4::OPEN4_SHARE_ACCESS_READ => flags.read = true,
            nfs4::OPEN4_SHARE_ACCESS_WRITE => flags.write = true,
            nfs4::OPEN4_SHARE_ACCESS_BOTH => {
                flags.read = true;
                flags.write = true;
            }
            _ => {}
        }

        let mut mode = 0o644;

        if let openflag4::Create(how) = &args.openhow {
            flags.create = true;

            match how {
                createhow4::Exclusive4(_verf) => {
                    // TODO: verify the stored verifier on re-create instead
                    // of treating this like GUARDED4.
                    flags.exclusive = true;
                }
                createhow4::Exclusive4_1(cva) => {
                    flags.exclusive = true;

                    let attrs = match super::decode_attrs(&cva.cva_attrs) {
                        Ok(attrs) => attrs,
                        Err(_) => {
                            return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_BADXDR)
                        }
                    };

                    mode = attrs.mode.unwrap_or(mode) & 0o777;
                }
                createhow4::Guarded4(create_attrs) => {
                    flags.exclusive = true;

                    let attrs = match super::decode_attrs(create_attrs) {
                        Ok(attrs) => attrs,
                        Err(_) => {
                            return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_BADXDR)
                        }
                    };

                    mode = attrs.mode.unwrap_or(mode) & 0o777;

                    if attrs.size == Some(0) {
                        flags.truncate = true;
                    }
                }
                createhow4::Unchecked4(create_attrs) => {
                    let attrs = match super::decode_attrs(create_attrs) {
                        Ok(attrs) => attrs,
                        Err(_) => {
                            return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_BADXDR)
                        }
                    };

                    mode = attrs.mode.unwrap_or(mode) & 0o777;
                }
            }
        }

        let path = match &args.claim {
            open_claim4::Null(file) => crate::vfs::join(&current.path, file),
            open_claim4::Fh => current.path.clone(),
            _ => return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_NOTSUPP),
        };

        if args.share_deny != 0 {
            return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_SHARE_DENIED);
        }

        if self.mux.clients.get(args.owner.clientid).is_none() {
            return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_STALE_CLIENTID);
        }

        let fs = self.fs().await;

        // A retransmitted OPEN finds its file by (client, seqid).
        if let Some(existing) = fs.get_file_by_client_seq_id(args.owner.clientid, args.seqid) {
            let status = self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4_OK)?;
            OPEN4resok {
                stateid: stateid4 { seqid: 1, other: file_other(existing, args.seqid) },
                cinfo: change_info4::default(),
                rflags: nfs4::OPEN4_RESULT_PRESERVE_UNLINKED,
                attrset: Bitmap::from_ids([A_MODE]).words(),
                delegation: open_delegation4::None,
            }
            .serialize(out)?;
            return Ok(status);
        }

        let stat = fs.fs().lstat(&path).await;

        if let Ok(info) = &stat {
            if info.is_dir() {
                return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_ISDIR);
            }

            if info.is_symlink() {
                return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_SYMLINK);
            }

            if !matches!(info.nfs_type(), nfs4::NF4REG) {
                return self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4ERR_NOTSUPP);
            }
        }

        let target_missing = matches!(&stat, Err(crate::vfs::FsError::NotFound));

        let file: Box<dyn FileIo> = if flags.write && !flags.read {
            match fs.fs().file_write(&path, flags).await {
                Ok(handle) => {
                    if target_missing {
                        // Freshly created: apply the requested mode.
                        let _ = fs.fs().chmod(&path, mode).await;
                    }
                    write_only(handle)
                }
                Err(err) => {
                    discard_on_fault(fs.shared(), &err);
                    return self.op_status(out, nfs4::OP4_OPEN, err.status());
                }
            }
        } else if flags.read && flags.write {
            match fs.fs().open_file(&path, flags, mode).await {
                Ok(handle) => handle,
                Err(err) => {
                    discard_on_fault(fs.shared(), &err);
                    return self.op_status(out, nfs4::OP4_OPEN, err.status());
                }
            }
        } else {
            match fs.fs().file_read(&path).await {
                Ok(handle) => read_only(handle),
                Err(err) => {
                    discard_on_fault(fs.shared(), &err);
                    return self.op_status(out, nfs4::OP4_OPEN, err.status());
                }
            }
        };

        let handle = if matches!(args.claim, open_claim4::Fh) {
            current.handle.clone()
        } else {
            match fs.fs().handle(&path).await {
                Ok(handle) => handle,
                Err(err) => {
                    discard_on_fault(fs.shared(), &err);

                    if let Err(close_err) = file.close().await {
                        error!("failed to close file after handle error: {close_err}");
                    }

                    let status = match err {
                        crate::vfs::FsError::Unsupported => nfsstat4::NFS4ERR_FHEXPIRED,
                        other => other.status(),
                    };

                    return self.op_status(out, nfs4::OP4_OPEN, status);
                }
            }
        };

        if matches!(args.openhow, openflag4::Create(_)) {
            fs.cache.invalidate(&current.handle);
        } else if flags.write {
            fs.cache.invalidate(&handle);
        }

        let file_index = fs.add_file(File {
            file: file.into(),
            handle: handle.clone(),
            client_id: args.owner.clientid,
            client_seq_id: args.seqid,
        });

        self.current_handle = Some(FileHandle { handle, path });

        let status = self.op_status(out, nfs4::OP4_OPEN, nfsstat4::NFS4_OK)?;
        OPEN4resok {
            stateid: stateid4 { seqid: 1, other: file_other(file_index, args.seqid) },
            cinfo: change_info4::default(),
            rflags: 0,
            attrset: Bitmap::from_ids([A_MODE]).words(),
            delegation: open_delegation4::None,
        }
        .serialize(out)?;

        Ok(status)
    }

    pub(super) async fn open_downgrade(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<OPEN_DOWNGRADE4args>(input)?;

        trace!("OPEN_DOWNGRADE {}", args.open_stateid.other[0]);

        if args.open_stateid.seqid > 1 {
            return self.op_status(out, nfs4::OP4_OPEN_DOWNGRADE, nfsstat4::NFS4ERR_BAD_SEQID);
        }

        let fs = self.fs().await;

        if fs.get_file(file_id(args.open_stateid.other)).is_none() {
            return self.op_status(out, nfs4::OP4_OPEN_DOWNGRADE, nfsstat4::NFS4ERR_BAD_SEQID);
        }

        let status = self.op_status(out, nfs4::OP4_OPEN_DOWNGRADE, nfsstat4::NFS4_OK)?;
        args.open_stateid.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn close(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<CLOSE4args>(input)?;

        trace!("CLOSE {}", args.open_stateid.other[0]);

        if args.open_stateid.seqid > 1 {
            return self.op_status(out, nfs4::OP4_CLOSE, nfsstat4::NFS4ERR_BAD_SEQID);
        }

        if self.current_handle.is_none() {
            return self.op_status(out, nfs4::OP4_CLOSE, nfsstat4::NFS4ERR_NOFILEHANDLE);
        }

        let fs = self.fs().await;

        let index = file_id(args.open_stateid.other);

        if fs.is_removed_file(index) {
            let status = self.op_status(out, nfs4::OP4_CLOSE, nfsstat4::NFS4_OK)?;
            stateid4 { seqid: 2, other: args.open_stateid.other }.serialize(out)?;
            return Ok(status);
        }

        let Some(file) = fs.remove_file(index) else {
            return self.op_status(out, nfs4::OP4_CLOSE, nfsstat4::NFS4ERR_BAD_SEQID);
        };

        fs.cache.invalidate(&file.handle);

        if let Err(err) = file.file.close().await {
            return self.op_status(out, nfs4::OP4_CLOSE, err.status());
        }

        let status = self.op_status(out, nfs4::OP4_CLOSE, nfsstat4::NFS4_OK)?;
        stateid4 { seqid: 2, other: args.open_stateid.other }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn read(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<READ4args>(input)?;

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_READ, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        trace!("READ {} {} {}", args.stateid.other[0], args.offset, args.count);

        if args.stateid.seqid > 1 {
            warn!("bad seqid: {}", args.stateid.seqid);
            return self.op_status(out, nfs4::OP4_READ, nfsstat4::NFS4ERR_BAD_SEQID);
        }

        let fs = self.fs().await;

        let file = fs
            .get_file(file_id(args.stateid.other))
            .filter(|f| f.handle == current.handle);

        let Some(file) = file else {
            warn!("stateid does not match the current filehandle");
            return self.op_status(out, nfs4::OP4_READ, nfsstat4::NFS4ERR_BAD_SEQID);
        };

        // Clients are told maxread is 32 KiB; cap the buffer regardless of
        // what they ask for.
        let count = args.count.min(MAX_READ_BUFFER) as usize;

        let mut buf = bufpool::get();
        let slice = buf.allocate(count);

        let (n, eof) = match file.file.read_at(slice, args.offset).await {
            Ok(read) => read,
            Err(err) => {
                error!("failed to read: {err}");
                buf.discard();
                return self.op_status(out, nfs4::OP4_READ, err.status());
            }
        };

        let status = self.op_status(out, nfs4::OP4_READ, nfsstat4::NFS4_OK)?;
        eof.serialize(out)?;
        slice[..n].serialize(out)?;

        buf.discard();

        Ok(status)
    }

    pub(super) async fn write(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<WRITE4args>(input)?;

        trace!("WRITE {} {} {}", args.stateid.other[0], args.offset, args.data.len());

        if args.stateid.seqid > 1 {
            return self.op_status(out, nfs4::OP4_WRITE, nfsstat4::NFS4ERR_BAD_SEQID);
        }

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_WRITE, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let file = fs
            .get_file(file_id(args.stateid.other))
            .filter(|f| f.handle == current.handle);

        let Some(file) = file else {
            return self.op_status(out, nfs4::OP4_WRITE, nfsstat4::NFS4ERR_BAD_SEQID);
        };

        // Durability is delegated to the backend; the requested stability
        // level only steers cache invalidation.
        let n = match file.file.write_at(&args.data, args.offset).await {
            Ok(n) => n,
            Err(err) => {
                error!("failed to write: {err}");
                return self.op_status(out, nfs4::OP4_WRITE, err.status());
            }
        };

        if args.stable == nfs4::FILE_SYNC4 {
            fs.cache.invalidate(&file.handle);
        }

        let status = self.op_status(out, nfs4::OP4_WRITE, nfsstat4::NFS4_OK)?;
        WRITE4resok {
            count: n as u32,
            committed: nfs4::FILE_SYNC4,
            writeverf: fs.session_verifier,
        }
        .serialize(out)?;

        Ok(status)
    }

    pub(super) async fn commit(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<COMMIT4args>(input)?;

        trace!("COMMIT {} {}", args.offset, args.count);

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_COMMIT, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        fs.cache.invalidate(&current.handle);

        let status = self.op_status(out, nfs4::OP4_COMMIT, nfsstat4::NFS4_OK)?;
        COMMIT4resok { writeverf: fs.session_verifier }.serialize(out)?;

        Ok(status)
    }
}
