//! Protocol module implementing the NFS version 4 protocol core.
//!
//! This module contains three main components:
//!
//! - `xdr`: External Data Representation (XDR, RFC 4506) serialization and
//!   deserialization of the RPC envelopes and every NFSv4 message type.
//!
//! - `rpc`: RPC record marking over TCP (RFC 5531): framing calls off the
//!   stream into pooled buffers and framing replies back onto it.
//!
//! - `nfs`: The COMPOUND runtime for NFSv4 minor versions 0, 1 and 2 —
//!   operation dispatch, current/saved filehandle state, stateids, sessions
//!   and the v4.1 reply cache.

pub mod nfs;
pub mod rpc;
pub mod xdr;
