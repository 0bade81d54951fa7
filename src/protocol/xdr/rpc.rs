//! Data structures for the ONC RPC (RFC 5531, previously RFC 1831) message
//! envelopes carrying NFSv4 calls and replies.
//!
//! A call message is fully typed here. Replies are split the way the server
//! writes them: a fixed three-word header (xid, message type, reply status)
//! followed by a payload buffer that the COMPOUND runtime fills in. The
//! split lets the runtime rewrite the COMPOUND header in place once the
//! executed operation count is known, without re-encoding the envelope.

// Keep original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use crate::{DeserializeStruct, SerializeStruct};

/// RPC protocol version required in every call.
pub const RPC_VERSION: u32 = 2;

/// The message is a call to a remote procedure.
pub const RPC_CALL: u32 = 0;
/// The message is a reply from a remote procedure.
pub const RPC_REPLY: u32 = 1;

/// The call was accepted and processed.
pub const MSG_ACCEPTED: u32 = 0;
/// The call was denied.
pub const MSG_DENIED: u32 = 1;

/// The RPC call completed successfully.
pub const ACCEPT_SUCCESS: u32 = 0;
/// The requested program number is not available on this server.
pub const ACCEPT_PROG_UNAVAIL: u32 = 1;
/// The requested program version is not supported by the server.
pub const ACCEPT_PROG_MISMATCH: u32 = 2;
/// The requested procedure number is not implemented by this program.
pub const ACCEPT_PROC_UNAVAIL: u32 = 3;
/// The server could not decode the procedure arguments.
pub const ACCEPT_GARBAGE_ARGS: u32 = 4;

/// RPC version number does not match the server's version 2.
pub const REJECT_RPC_MISMATCH: u32 = 0;
/// The server refuses to authenticate the caller.
pub const REJECT_AUTH_ERROR: u32 = 1;

/// Invalid credentials (seal broken).
pub const AUTH_BADCRED: u32 = 1;
/// Credentials rejected, the client must begin a new session.
pub const AUTH_REJECTEDCRED: u32 = 2;
/// Invalid verifier (seal broken).
pub const AUTH_BADVERF: u32 = 3;
/// Verifier expired or replayed.
pub const AUTH_REJECTEDVERF: u32 = 4;
/// Rejected for security reasons.
pub const AUTH_TOOWEAK: u32 = 5;

/// No authentication.
pub const AUTH_FLAVOR_NULL: u32 = 0;
/// UNIX-style authentication (uid/gid/groups).
pub const AUTH_FLAVOR_UNIX: u32 = 1;
/// Short-form authentication.
pub const AUTH_FLAVOR_SHORT: u32 = 2;
/// DES authentication.
pub const AUTH_FLAVOR_DES: u32 = 3;

/// An authentication field: the mechanism identifier plus opaque body bytes
/// interpreted according to that mechanism. Calls carry two (credentials and
/// verifier); accepted replies carry one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct opaque_auth {
    /// The authentication mechanism being used (`AUTH_FLAVOR_*`).
    pub flavor: u32,
    /// The opaque authentication data associated with that mechanism.
    pub body: Vec<u8>,
}
SerializeStruct!(opaque_auth, flavor, body);
DeserializeStruct!(opaque_auth, flavor, body);

/// The typed prefix of an RPC call message, up to but excluding the
/// procedure-specific arguments. The arguments stay in the receive buffer
/// and are decoded by the dispatched handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct rpc_call {
    /// Transaction identifier used by the client to match the reply.
    pub xid: u32,
    /// Must be [`RPC_CALL`].
    pub msg_type: u32,
    /// RPC protocol version, must be 2.
    pub rpcvers: u32,
    /// Program number; NFS is 100003.
    pub prog: u32,
    /// Program version; this server speaks 4.
    pub vers: u32,
    /// Procedure within the program (NULL or COMPOUND).
    pub proc: u32,
    /// Caller credentials.
    pub cred: opaque_auth,
    /// Caller verifier.
    pub verf: opaque_auth,
}
SerializeStruct!(rpc_call, xid, msg_type, rpcvers, prog, vers, proc, cred, verf);
DeserializeStruct!(rpc_call, xid, msg_type, rpcvers, prog, vers, proc, cred, verf);

/// The fixed part of a reply message. Whatever follows (verifier and accept
/// status for accepted replies, reject status and auth status for denied
/// ones) is written into the payload buffer by the handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct rpc_reply {
    /// Echoes the xid of the corresponding call.
    pub xid: u32,
    /// Always [`RPC_REPLY`].
    pub msg_type: u32,
    /// [`MSG_ACCEPTED`] or [`MSG_DENIED`].
    pub reply_stat: u32,
}
SerializeStruct!(rpc_reply, xid, msg_type, reply_stat);
DeserializeStruct!(rpc_reply, xid, msg_type, reply_stat);

impl rpc_reply {
    /// An accepted reply envelope for the given call.
    pub fn accepted(xid: u32) -> Self {
        rpc_reply { xid, msg_type: RPC_REPLY, reply_stat: MSG_ACCEPTED }
    }

    /// A denied reply envelope for the given call.
    pub fn denied(xid: u32) -> Self {
        rpc_reply { xid, msg_type: RPC_REPLY, reply_stat: MSG_DENIED }
    }
}

/// Range of program versions supported, returned with `PROG_MISMATCH`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    /// Lowest version supported.
    pub low: u32,
    /// Highest version supported.
    pub high: u32,
}
SerializeStruct!(mismatch_info, low, high);
DeserializeStruct!(mismatch_info, low, high);
