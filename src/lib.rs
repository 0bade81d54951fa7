//! NFS Sable - an NFS version 4 server core in Rust
//!
//! This library implements the server side of NFS version 4 (minor
//! versions 0, 1 and 2) over TCP, exposing a pluggable virtual filesystem
//! to standard NFS clients.
//!
//! ## Supported Features
//!
//! - The COMPOUND procedure with the full filehandle, attribute, open/close
//!   and read/write operation set, directory enumeration with cookie
//!   continuation, and extended attributes (RFC 8276)
//! - The v4.0 client handshake (SETCLIENTID / SETCLIENTID_CONFIRM) and the
//!   v4.1 session machinery (EXCHANGE_ID / CREATE_SESSION / SEQUENCE) with
//!   per-slot reply caching for exactly-once semantics
//! - `AUTH_UNIX` authentication with per-(session, uid) filesystem views
//! - Asynchronous operation with the Tokio runtime; requests within a
//!   connection execute concurrently while replies stay ordered on the wire
//!
//! Locking, delegations and pNFS layouts are not implemented; the
//! corresponding operations answer their protocol-defined error codes.
//!
//! ## Main Components
//!
//! - `vfs`: the [`vfs::AdvancedLinkFs`] trait a storage backend implements
//!   to be exported, plus the error taxonomy mapped onto NFSv4 statuses.
//!
//! - `server`: the TCP listener, worker pool and shutdown plumbing. Create
//!   a [`server::Server`] with a root-filesystem loader and call `serve`.
//!
//! - `protocol`: the XDR codec, RPC framing and the COMPOUND runtime.
//!
//! - `clients`, `worker`, `bufpool`, `clock`, `auth`: the supporting state
//!   behind the protocol — client registry with sessions and reply-cache
//!   slots, per-user filesystem workers, pooled wire buffers, the cached
//!   monotone clock and credential handling.
//!
//! ## Standards Compliance
//!
//! This implementation follows these RFCs where it matters on the wire,
//! without claiming conformance to every MUST:
//! - RFC 7530: NFS version 4.0
//! - RFC 5661: NFS version 4.1
//! - RFC 7862 / RFC 8276: NFS version 4.2 and extended attributes
//! - RFC 5531: RPC version 2
//! - RFC 4506: XDR

pub mod auth;
pub mod bufpool;
pub mod clients;
pub mod clock;
pub mod conn;
pub mod protocol;
pub mod server;
pub mod vfs;
pub mod worker;

pub use protocol::xdr;
pub use server::{RootLoader, Server};
