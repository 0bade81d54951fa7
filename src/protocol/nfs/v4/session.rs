//! Client and session lifecycle operations: SETCLIENTID and its
//! confirmation (v4.0), EXCHANGE_ID / CREATE_SESSION / DESTROY_SESSION /
//! DESTROY_CLIENTID / RECLAIM_COMPLETE (v4.1+), lease renewal and the
//! SECINFO pair.
//!
//! Minor-version gating happens here: the v4.0 handshake operations are
//! illegal inside a sessioned compound and the v4.1 ones are illegal
//! without one.

use anyhow::Error;
use tracing::{info, trace};

use super::{fmt_session, Compound};
use crate::bufpool::Buf;
use crate::clients::client_id_from_session_id;
use crate::protocol::xdr::nfs4::{
    self, nfsstat4, secinfo4, CREATE_SESSION4args, CREATE_SESSION4resok, EXCHANGE_ID4args,
    EXCHANGE_ID4resok, RENEW4args, SECINFO4args, SECINFO4resok, SETCLIENTID4args,
    SETCLIENTID4resok, SETCLIENTID_CONFIRM4args, server_owner4,
};
use crate::protocol::xdr::rpc::AUTH_FLAVOR_UNIX;
use crate::protocol::xdr::{deserialize, Serialize};

/// The server-owner identity announced by EXCHANGE_ID.
const SERVER_OWNER_MAJOR_ID: &str = "nfs4-sable";

impl Compound<'_> {
    pub(super) async fn setclientid(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        if self.minor_ver > 0 {
            return self.op_status(out, nfs4::OP4_SETCLIENTID, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let args = deserialize::<SETCLIENTID4args>(input)?;

        trace!("SETCLIENTID {}", String::from_utf8_lossy(&args.client.id));

        let (clientid, confirm_value, _) =
            match self.mux.clients.add(&args.client.id, args.client.verifier, &self.creds) {
                Ok(added) => added,
                Err(status) => return self.op_status(out, nfs4::OP4_SETCLIENTID, status),
            };

        let status = self.op_status(out, nfs4::OP4_SETCLIENTID, nfsstat4::NFS4_OK)?;
        SETCLIENTID4resok { clientid, setclientid_confirm: confirm_value }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn setclientid_confirm(
        &mut self,
        input: &mut Buf,
        out: &mut Buf,
    ) -> Result<nfsstat4, Error> {
        if self.minor_ver > 0 {
            return self.op_status(out, nfs4::OP4_SETCLIENTID_CONFIRM, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let args = deserialize::<SETCLIENTID_CONFIRM4args>(input)?;

        trace!("SETCLIENTID_CONFIRM {} {}", args.clientid, args.setclientid_confirm);

        let status = match self.mux.clients.confirm(
            args.clientid,
            args.setclientid_confirm,
            &self.creds,
        ) {
            Ok(()) => nfsstat4::NFS4_OK,
            Err(status) => status,
        };

        self.op_status(out, nfs4::OP4_SETCLIENTID_CONFIRM, status)
    }

    pub(super) async fn exchange_id(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        if self.minor_ver < 1 {
            return self.op_status(out, nfs4::OP4_EXCHANGE_ID, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let args = deserialize::<EXCHANGE_ID4args>(input)?;

        trace!(
            "EXCHANGE_ID {} {}",
            String::from_utf8_lossy(&args.client_owner.ownerid),
            args.flags
        );

        let server_owner =
            server_owner4 { minor_id: 0, major_id: SERVER_OWNER_MAJOR_ID.to_string() };

        if let Some(clientid) = self.mux.clients.get_by_name(
            &args.client_owner.ownerid,
            args.client_owner.verifier,
            &self.creds,
        ) {
            let status = self.op_status(out, nfs4::OP4_EXCHANGE_ID, nfsstat4::NFS4_OK)?;
            EXCHANGE_ID4resok {
                clientid,
                sequenceid: 0,
                flags: nfs4::EXCHGID4_FLAG_USE_NON_PNFS
                    | nfs4::EXCHGID4_FLAG_BIND_PRINC_STATEID
                    | nfs4::EXCHGID4_FLAG_CONFIRMED_R,
                server_owner,
                ..Default::default()
            }
            .serialize(out)?;
            return Ok(status);
        }

        if args.flags & nfs4::EXCHGID4_FLAG_UPD_CONFIRMED_REC_A != 0 {
            return self.op_status(out, nfs4::OP4_EXCHANGE_ID, nfsstat4::NFS4ERR_STALE_CLIENTID);
        }

        let (clientid, _, sequenceid) = match self.mux.clients.add(
            &args.client_owner.ownerid,
            args.client_owner.verifier,
            &self.creds,
        ) {
            Ok(added) => added,
            Err(status) => return self.op_status(out, nfs4::OP4_EXCHANGE_ID, status),
        };

        let status = self.op_status(out, nfs4::OP4_EXCHANGE_ID, nfsstat4::NFS4_OK)?;
        EXCHANGE_ID4resok {
            clientid,
            sequenceid,
            flags: nfs4::EXCHGID4_FLAG_USE_NON_PNFS | nfs4::EXCHGID4_FLAG_BIND_PRINC_STATEID,
            server_owner,
            ..Default::default()
        }
        .serialize(out)?;

        Ok(status)
    }

    pub(super) async fn create_session(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        if self.minor_ver < 1 {
            return self.op_status(out, nfs4::OP4_CREATE_SESSION, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let mut args = deserialize::<CREATE_SESSION4args>(input)?;

        trace!("CREATE_SESSION {} {}", args.clientid, args.sequenceid);

        if let Err(status) =
            self.mux.clients.confirm41(args.clientid, args.sequenceid, &self.creds)
        {
            return self.op_status(out, nfs4::OP4_CREATE_SESSION, status);
        }

        let persist = args.flags & nfs4::CREATE_SESSION4_FLAG_PERSIST != 0;

        let Some(sessionid) = self.mux.clients.build_session(args.clientid, persist) else {
            return self.op_status(out, nfs4::OP4_CREATE_SESSION, nfsstat4::NFS4ERR_STALE_CLIENTID);
        };

        args.fore_chan_attrs.ca_headerpadsize = 0;
        args.fore_chan_attrs.ca_rdma_ird.clear();
        args.back_chan_attrs.ca_headerpadsize = 0;
        args.back_chan_attrs.ca_rdma_ird.clear();

        info!("session {} created for client {}", fmt_session(&sessionid), args.clientid);

        let status = self.op_status(out, nfs4::OP4_CREATE_SESSION, nfsstat4::NFS4_OK)?;
        CREATE_SESSION4resok {
            sessionid,
            sequenceid: args.sequenceid,
            flags: args.flags
                & (nfs4::CREATE_SESSION4_FLAG_CONN_BACK_CHAN | nfs4::CREATE_SESSION4_FLAG_PERSIST),
            fore_chan_attrs: args.fore_chan_attrs,
            back_chan_attrs: args.back_chan_attrs,
        }
        .serialize(out)?;

        Ok(status)
    }

    pub(super) async fn reclaim_complete(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        if self.minor_ver < 1 {
            return self.op_status(out, nfs4::OP4_RECLAIM_COMPLETE, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let one_fs = deserialize::<bool>(input)?;

        trace!("RECLAIM_COMPLETE {one_fs}");

        self.op_status(out, nfs4::OP4_RECLAIM_COMPLETE, nfsstat4::NFS4_OK)
    }

    pub(super) async fn destroy_session(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        if self.minor_ver < 1 {
            return self.op_status(out, nfs4::OP4_DESTROY_SESSION, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let sessionid = deserialize::<[u8; 16]>(input)?;

        trace!("DESTROY_SESSION {}", fmt_session(&sessionid));

        self.mux.clients.remove_session(sessionid);

        self.op_status(out, nfs4::OP4_DESTROY_SESSION, nfsstat4::NFS4_OK)
    }

    pub(super) async fn destroy_clientid(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        if self.minor_ver < 1 {
            return self.op_status(out, nfs4::OP4_DESTROY_CLIENTID, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let clientid = deserialize::<u64>(input)?;

        trace!("DESTROY_CLIENTID {clientid}");

        let status = match self.mux.clients.remove_client(clientid) {
            Ok(()) => nfsstat4::NFS4_OK,
            Err(status) => status,
        };

        self.op_status(out, nfs4::OP4_DESTROY_CLIENTID, status)
    }

    pub(super) async fn renew(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        if self.minor_ver > 0 {
            return self.op_status(out, nfs4::OP4_RENEW, nfsstat4::NFS4ERR_OP_ILLEGAL);
        }

        let args = deserialize::<RENEW4args>(input)?;

        trace!("RENEW {}", args.clientid);

        let Some(creds) = self.mux.clients.get(args.clientid) else {
            return self.op_status(out, nfs4::OP4_RENEW, nfsstat4::NFS4ERR_EXPIRED);
        };

        if !creds.equal(&self.creds) {
            return self.op_status(out, nfs4::OP4_RENEW, nfsstat4::NFS4ERR_ACCESS);
        }

        self.op_status(out, nfs4::OP4_RENEW, nfsstat4::NFS4_OK)
    }

    pub(super) async fn secinfo(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<SECINFO4args>(input)?;

        trace!("SECINFO {}", args.name);

        let status = self.op_status(out, nfs4::OP4_SECINFO, nfsstat4::NFS4_OK)?;
        SECINFO4resok { items: vec![secinfo4 { flavor: AUTH_FLAVOR_UNIX }] }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn secinfo_no_name(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let style = deserialize::<u32>(input)?;

        trace!("SECINFO_NO_NAME {style}");

        let status = self.op_status(out, nfs4::OP4_SECINFO_NO_NAME, nfsstat4::NFS4_OK)?;
        SECINFO4resok { items: vec![secinfo4 { flavor: AUTH_FLAVOR_UNIX }] }.serialize(out)?;

        Ok(status)
    }

    /// The client id an OPEN under a session implicitly belongs to.
    pub(super) fn session_client_id(&self) -> u64 {
        client_id_from_session_id(self.session_id)
    }
}
