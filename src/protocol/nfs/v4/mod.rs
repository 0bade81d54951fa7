//! The NFSv4 COMPOUND runtime.
//!
//! A COMPOUND call carries a tag, a minor version and a sequence of
//! operations executed in order against shared current/saved filehandle
//! state. The reply mirrors the call: one (opcode, status, result) triple
//! per executed operation, prefixed by a header naming the final status and
//! the executed-operation count. Because the count is only known at the
//! end, a provisional header is written first and patched in place via the
//! buffer's write cursor when an operation fails or a fatal status cuts the
//! compound short.
//!
//! Under minor versions 1 and 2 a compound normally starts with SEQUENCE,
//! which binds it to a session slot and the per-slot reply cache; the few
//! operations allowed outside a session must travel alone.
//!
//! Handlers are grouped by operation family in the submodules; each is a
//! method on [`Compound`] decoding its arguments from the input buffer and
//! encoding its result into the output buffer.

use std::sync::Arc;

use anyhow::Error;
use tracing::{debug, trace, warn};

use crate::auth::{self, Creds};
use crate::bufpool::{self, Buf};
use crate::clients::{Clients, SlotCheck, MAX_SLOT_ID};
use crate::protocol::xdr::nfs4::{self, nfsstat4, SEQUENCE4args, SEQUENCE4resok};
use crate::protocol::xdr::rpc::{
    opaque_auth, rpc_call, rpc_reply, ACCEPT_SUCCESS, AUTH_FLAVOR_NULL, REJECT_AUTH_ERROR,
};
use crate::protocol::xdr::{deserialize, Serialize};
use crate::vfs::FsError;
use crate::worker::{Worker, WorkerGuard, WorkerSource};

mod attr_ops;
pub mod attrs;
mod bitmap;
mod dir;
mod file;
mod fileid;
mod session;
mod state;
mod xattr;

pub use attrs::{decode_attrs, encode_attrs, DecodedAttrs, ATTRS_SUPPORTED};
pub use bitmap::Bitmap;
pub use fileid::{file_id, file_other};

/// First operations a v4.1+ compound may open with; everything else answers
/// `OP_NOT_IN_SESSION`.
const ALLOWED_FIRST_OPS_41: [u32; 5] = [
    nfs4::OP4_CREATE_SESSION,
    nfs4::OP4_DESTROY_SESSION,
    nfs4::OP4_SEQUENCE,
    nfs4::OP4_BIND_CONN_TO_SESSION,
    nfs4::OP4_EXCHANGE_ID,
];

/// Required operations this server does not implement; hitting one is a
/// server fault.
const NOT_IMPLEMENTED_REQUIRED_OPS: [u32; 9] = [
    nfs4::OP4_BACKCHANNEL_CTL,
    nfs4::OP4_BIND_CONN_TO_SESSION,
    nfs4::OP4_FREE_STATEID,
    nfs4::OP4_ILLEGAL,
    nfs4::OP4_LOCK,
    nfs4::OP4_LOCKT,
    nfs4::OP4_LOCKU,
    nfs4::OP4_SET_SSV,
    nfs4::OP4_TEST_STATEID,
];

/// Optional operations this server does not implement; these answer
/// `NOTSUPP`.
const NOT_IMPLEMENTED_OPTIONAL_OPS: [u32; 22] = [
    nfs4::OP4_ALLOCATE,
    nfs4::OP4_CLONE,
    nfs4::OP4_COPY,
    nfs4::OP4_COPY_NOTIFY,
    nfs4::OP4_DEALLOCATE,
    nfs4::OP4_DELEGPURGE,
    nfs4::OP4_DELEGRETURN,
    nfs4::OP4_GETDEVICEINFO,
    nfs4::OP4_GET_DIR_DELEGATION,
    nfs4::OP4_IO_ADVISE,
    nfs4::OP4_LAYOUTCOMMIT,
    nfs4::OP4_LAYOUTERROR,
    nfs4::OP4_LAYOUTGET,
    nfs4::OP4_LAYOUTRETURN,
    nfs4::OP4_LAYOUTSTATS,
    nfs4::OP4_OFFLOAD_CANCEL,
    nfs4::OP4_OFFLOAD_STATUS,
    nfs4::OP4_OPENATTR,
    nfs4::OP4_READ_PLUS,
    nfs4::OP4_SEEK,
    nfs4::OP4_WANT_DELEGATION,
    nfs4::OP4_WRITE_SAME,
];

/// A (handle, path) pair: the current or saved filehandle of a compound.
#[derive(Clone, Debug)]
pub struct FileHandle {
    pub handle: Vec<u8>,
    pub path: String,
}

/// The NFSv4 request multiplexer for one connection.
pub struct Mux {
    pub clients: Arc<Clients>,
    pub workers: Arc<dyn WorkerSource>,
    /// Peer address, for logging.
    pub remote: String,
}

impl Mux {
    /// Handles one framed call and produces the reply envelope plus
    /// payload. An error aborts the connection.
    pub async fn handle(&self, call: &rpc_call, data: Buf) -> Result<(rpc_reply, Buf), Error> {
        match call.proc {
            nfs4::PROC4_VOID => self.void(call, data),
            nfs4::PROC4_COMPOUND => self.compound(call, data).await,
            proc => {
                data.discard();
                Err(anyhow::anyhow!("not implemented: procedure {proc}"))
            }
        }
    }

    /// The NULL procedure: an accepted reply with an empty result.
    fn void(&self, call: &rpc_call, mut data: Buf) -> Result<(rpc_reply, Buf), Error> {
        data.reset();

        opaque_auth { flavor: AUTH_FLAVOR_NULL, body: Vec::new() }.serialize(&mut data)?;
        ACCEPT_SUCCESS.serialize(&mut data)?;

        Ok((rpc_reply::accepted(call.xid), data))
    }

    async fn compound(&self, call: &rpc_call, mut data: Buf) -> Result<(rpc_reply, Buf), Error> {
        let (auth_resp, creds) = match auth::authenticate(&call.cred, &call.verf) {
            Ok(ok) => ok,
            Err(auth_err) => {
                data.reset();
                REJECT_AUTH_ERROR.serialize(&mut data)?;
                auth_err.code.serialize(&mut data)?;
                return Ok((rpc_reply::denied(call.xid), data));
            }
        };

        let header = (
            deserialize::<String>(&mut data),
            deserialize::<u32>(&mut data),
            deserialize::<u32>(&mut data),
        );

        let (tag, minor_ver, ops_count) = match header {
            (Ok(tag), Ok(minor_ver), Ok(ops_count)) => (tag, minor_ver, ops_count),
            _ => {
                data.discard();
                return Err(anyhow::anyhow!("bad COMPOUND header"));
            }
        };

        if minor_ver > 2 {
            data.discard();

            let mut out = bufpool::get();
            auth_resp.serialize(&mut out)?;
            ACCEPT_SUCCESS.serialize(&mut out)?;
            nfsstat4::NFS4ERR_MINOR_VERS_MISMATCH.serialize(&mut out)?;
            tag.serialize(&mut out)?;
            0_u32.serialize(&mut out)?;

            return Ok((rpc_reply::accepted(call.xid), out));
        }

        trace!("[COMPOUND WITH {ops_count} OPS] (v4.{minor_ver})");

        let mut compound = Compound {
            mux: self,
            auth_resp,
            minor_ver,
            tag,
            ops_count,
            creds,
            current_handle: None,
            saved_handle: None,
            session_id: [0; 16],
            slot: None,
        };

        let mut out = bufpool::get();

        let result = compound.run(&mut data, &mut out).await;
        data.discard();

        match result {
            Ok(()) => Ok((rpc_reply::accepted(call.xid), out)),
            Err(err) => {
                out.discard();
                Err(err)
            }
        }
    }
}

/// One COMPOUND execution: header fields, credentials and the filehandle
/// state shared by its operations.
pub struct Compound<'a> {
    pub(super) mux: &'a Mux,
    auth_resp: opaque_auth,
    pub(crate) minor_ver: u32,
    tag: String,
    ops_count: u32,
    pub(crate) creds: Creds,

    pub(crate) current_handle: Option<FileHandle>,
    pub(crate) saved_handle: Option<FileHandle>,
    /// Set by SEQUENCE under v4.1+.
    pub(crate) session_id: [u8; 16],
    /// (slot id, sequence id) of the bound slot, when sessioned.
    pub(crate) slot: Option<(u32, u32)>,
}

impl Compound<'_> {
    async fn run(&mut self, input: &mut Buf, out: &mut Buf) -> Result<(), Error> {
        let op = deserialize::<u32>(input)?;

        if self.minor_ver > 0 {
            if !ALLOWED_FIRST_OPS_41.contains(&op) {
                return self.single_op_reply(out, op, nfsstat4::NFS4ERR_OP_NOT_IN_SESSION);
            }

            if op != nfs4::OP4_SEQUENCE && self.ops_count > 1 {
                return self.single_op_reply(out, op, nfsstat4::NFS4ERR_NOT_ONLY_OP);
            }

            if op == nfs4::OP4_SEQUENCE {
                return self.run_sequence(input, out).await;
            }
        }

        self.write_header(out, self.ops_count, nfsstat4::NFS4_OK)?;

        let mut last_status = self.operation(input, out, op).await?;
        let mut ops_executed = 1;

        while ops_executed < self.ops_count && !last_status.is_fatal() {
            let op = deserialize::<u32>(input)?;
            last_status = self.operation(input, out, op).await?;
            ops_executed += 1;
        }

        self.rewrite_header_if_needed(out, ops_executed, last_status)
    }

    /// The sessioned path: SEQUENCE binds the compound to a session slot,
    /// possibly replaying a cached reply instead of executing anything.
    async fn run_sequence(&mut self, input: &mut Buf, out: &mut Buf) -> Result<(), Error> {
        let args = deserialize::<SEQUENCE4args>(input)?;

        trace!(
            "SEQUENCE {} {} {}",
            fmt_session(&args.sessionid),
            args.sequenceid,
            args.slotid
        );

        let cache = match self.mux.clients.slot_begin(
            args.sessionid,
            args.slotid,
            args.sequenceid,
            args.cachethis,
            out,
        ) {
            Ok(SlotCheck::Replay) => return Ok(()),
            Ok(SlotCheck::RetryUncached) => {
                warn!("{}: retry of an uncached reply", self.mux.remote);
                return self.single_op_reply(
                    out,
                    nfs4::OP4_SEQUENCE,
                    nfsstat4::NFS4ERR_RETRY_UNCACHED_REP,
                );
            }
            Ok(SlotCheck::Misordered) => {
                warn!("{}: out of order sequence {}", self.mux.remote, args.sequenceid);
                return self.single_op_reply(
                    out,
                    nfs4::OP4_SEQUENCE,
                    nfsstat4::NFS4ERR_SEQ_MISORDERED,
                );
            }
            Ok(SlotCheck::Execute { cache }) => cache,
            Err(status) => {
                warn!("{}: no session for SEQUENCE", self.mux.remote);
                return self.single_op_reply(out, nfs4::OP4_SEQUENCE, status);
            }
        };

        self.session_id = args.sessionid;
        self.slot = Some((args.slotid, args.sequenceid));

        self.write_header(out, self.ops_count, nfsstat4::NFS4_OK)?;

        let mut last_status = self.op_status(out, nfs4::OP4_SEQUENCE, nfsstat4::NFS4_OK)?;
        SEQUENCE4resok {
            sessionid: args.sessionid,
            sequenceid: args.sequenceid,
            slotid: args.slotid,
            highest_slotid: MAX_SLOT_ID,
            target_highest_slotid: MAX_SLOT_ID,
            status_flags: 0,
        }
        .serialize(out)?;

        let mut ops_executed = 1;

        while ops_executed < self.ops_count && !last_status.is_fatal() {
            let op = deserialize::<u32>(input)?;
            last_status = self.operation(input, out, op).await?;
            ops_executed += 1;
        }

        self.rewrite_header_if_needed(out, ops_executed, last_status)?;

        if cache {
            self.mux.clients.slot_store(args.sessionid, args.slotid, out);
        }

        Ok(())
    }

    /// Writes the COMPOUND reply header: reply verifier, accept status,
    /// final operation status, tag, executed-operation count.
    fn write_header(&self, out: &mut Buf, ops_count: u32, last_status: nfsstat4) -> Result<(), Error> {
        self.auth_resp.serialize(out)?;
        ACCEPT_SUCCESS.serialize(out)?;
        last_status.serialize(out)?;
        self.tag.serialize(out)?;
        ops_count.serialize(out)?;
        Ok(())
    }

    /// A one-operation reply used for protocol-level refusals.
    fn single_op_reply(&self, out: &mut Buf, op: u32, status: nfsstat4) -> Result<(), Error> {
        self.write_header(out, 1, status)?;
        op.serialize(out)?;
        status.serialize(out)?;
        Ok(())
    }

    /// Patches the header in place when fewer operations ran than requested
    /// or the final status is not OK. The header size only depends on the
    /// verifier and tag, both fixed for the compound, so the rewrite lands
    /// exactly on the provisional bytes.
    fn rewrite_header_if_needed(
        &self,
        out: &mut Buf,
        ops_executed: u32,
        last_status: nfsstat4,
    ) -> Result<(), Error> {
        if last_status == nfsstat4::NFS4_OK && ops_executed == self.ops_count {
            return Ok(());
        }

        let offset = out.seek_write(0);
        self.write_header(out, ops_executed, last_status)?;
        out.seek_write(offset);

        Ok(())
    }

    /// Starts an operation result: opcode then status. Handlers append
    /// their result body after it.
    pub(crate) fn op_status(
        &self,
        out: &mut Buf,
        op: u32,
        status: nfsstat4,
    ) -> Result<nfsstat4, Error> {
        if status != nfsstat4::NFS4_OK {
            debug!("operation [{}] failed with status {status:?}", nfs4::op_name(op));
        }

        op.serialize(out)?;
        status.serialize(out)?;

        Ok(status)
    }

    /// Acquires the worker serving this compound's credentials and session.
    /// v4.0 traffic has no session, so the pool key is synthesised from the
    /// peer's address instead.
    pub(crate) async fn fs(&self) -> WorkerGuard {
        let session_id = if self.session_id == [0; 16] {
            session_key_for_remote(&self.mux.remote)
        } else {
            self.session_id
        };

        self.mux.workers.acquire(&self.creds, session_id).await
    }

    async fn operation(&mut self, input: &mut Buf, out: &mut Buf, op: u32) -> Result<nfsstat4, Error> {
        match op {
            nfs4::OP4_SETCLIENTID => self.setclientid(input, out).await,
            nfs4::OP4_SETCLIENTID_CONFIRM => self.setclientid_confirm(input, out).await,
            nfs4::OP4_EXCHANGE_ID => self.exchange_id(input, out).await,
            nfs4::OP4_CREATE_SESSION => self.create_session(input, out).await,
            nfs4::OP4_RECLAIM_COMPLETE => self.reclaim_complete(input, out).await,
            nfs4::OP4_DESTROY_SESSION => self.destroy_session(input, out).await,
            nfs4::OP4_DESTROY_CLIENTID => self.destroy_clientid(input, out).await,
            nfs4::OP4_PUTROOTFH => self.putrootfh(out).await,
            nfs4::OP4_PUTPUBFH => self.putpubfh(out).await,
            nfs4::OP4_PUTFH => self.putfh(input, out).await,
            nfs4::OP4_GETFH => self.getfh(out),
            nfs4::OP4_SAVEFH => self.savefh(out),
            nfs4::OP4_RESTOREFH => self.restorefh(out),
            nfs4::OP4_GETATTR => self.getattr(input, out).await,
            nfs4::OP4_LOOKUP => self.lookup(input, out).await,
            nfs4::OP4_LOOKUPP => self.lookupp(out).await,
            nfs4::OP4_ACCESS => self.access(input, out).await,
            nfs4::OP4_READDIR => self.readdir(input, out).await,
            nfs4::OP4_RENEW => self.renew(input, out).await,
            nfs4::OP4_SECINFO => self.secinfo(input, out).await,
            nfs4::OP4_SECINFO_NO_NAME => self.secinfo_no_name(input, out).await,
            nfs4::OP4_CREATE => self.create(input, out).await,
            nfs4::OP4_RENAME => self.rename(input, out).await,
            nfs4::OP4_REMOVE => self.remove(input, out).await,
            nfs4::OP4_LINK => self.link(input, out).await,
            nfs4::OP4_READLINK => self.readlink(out).await,
            nfs4::OP4_SETATTR => self.setattr(input, out).await,
            nfs4::OP4_OPEN => self.open(input, out).await,
            nfs4::OP4_OPEN_DOWNGRADE => self.open_downgrade(input, out).await,
            nfs4::OP4_CLOSE => self.close(input, out).await,
            nfs4::OP4_READ => self.read(input, out).await,
            nfs4::OP4_WRITE => self.write(input, out).await,
            nfs4::OP4_COMMIT => self.commit(input, out).await,
            nfs4::OP4_VERIFY => self.verify(input, out).await,
            nfs4::OP4_NVERIFY => self.nverify(input, out).await,
            nfs4::OP4_GETXATTR => self.getxattr(input, out).await,
            nfs4::OP4_SETXATTR => self.setxattr(input, out).await,
            nfs4::OP4_LISTXATTRS => self.listxattrs(input, out).await,
            nfs4::OP4_REMOVEXATTR => self.removexattr(input, out).await,
            // Note: only statuses in the fatal set may be returned here, so
            // the unread argument bytes never get misinterpreted.
            op if NOT_IMPLEMENTED_OPTIONAL_OPS.contains(&op) => {
                debug!("optional operation not implemented: {}", nfs4::op_name(op));
                self.op_status(out, op, nfsstat4::NFS4ERR_NOTSUPP)
            }
            op if NOT_IMPLEMENTED_REQUIRED_OPS.contains(&op) => {
                warn!("required operation not implemented: {}", nfs4::op_name(op));
                self.op_status(out, op, nfsstat4::NFS4ERR_SERVERFAULT)
            }
            op => self.op_status(out, op, nfsstat4::NFS4ERR_OP_ILLEGAL),
        }
    }
}

/// Discards the worker unless the error is in the non-fatal set, so the
/// next request re-instantiates the filesystem.
pub(crate) fn discard_on_fault(fs: &Arc<Worker>, err: &FsError) {
    if !err.is_fatal() {
        return;
    }

    warn!("discarding filesystem worker because of error: {err}");
    fs.discard();
}

pub(crate) fn fmt_session(session_id: &[u8; 16]) -> String {
    session_id.iter().map(|b| format!("{b:02x}")).collect()
}

/// A stable per-peer worker key for sessionless (v4.0) traffic, derived by
/// hashing the peer's IP.
fn session_key_for_remote(remote: &str) -> [u8; 16] {
    use std::hash::{Hash, Hasher};

    let ip = remote.rsplit_once(':').map_or(remote, |(ip, _)| ip);

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ip.hash(&mut hasher);
    let digest = hasher.finish();

    let mut key = [0_u8; 16];
    key[..8].copy_from_slice(&digest.to_be_bytes());
    key[8..].copy_from_slice(&digest.to_le_bytes());

    key
}
