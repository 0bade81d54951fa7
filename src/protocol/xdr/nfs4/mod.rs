//! Constants and XDR data types for NFS version 4 (RFC 7530 for minor
//! version 0, RFC 5661 for 4.1, RFC 7862/8276 for 4.2).
//!
//! NFSv4 folds everything into a single COMPOUND procedure whose body is a
//! sequence of primitive operations executed against a shared current/saved
//! filehandle. This module defines the operation numbers, status codes and
//! the typed argument/result structures for every operation the server
//! implements; [`types`] carries the structs and discriminated unions.

// Preserve original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use num_derive::{FromPrimitive, ToPrimitive};

use crate::XdrEnum;

pub mod types;

pub use types::*;

/// The RPC program number for the NFS service.
pub const PROGRAM: u32 = 100003;
/// The program version for NFS version 4.
pub const VERSION: u32 = 4;

/// The NULL procedure: does nothing, answers nothing.
pub const PROC4_VOID: u32 = 0;
/// The COMPOUND procedure carrying every NFSv4 operation.
pub const PROC4_COMPOUND: u32 = 1;

// Operation numbers within a COMPOUND (RFC 7530 §16, RFC 5661 §18,
// RFC 7862 §15, RFC 8276 §8).
pub const OP4_ACCESS: u32 = 3;
pub const OP4_CLOSE: u32 = 4;
pub const OP4_COMMIT: u32 = 5;
pub const OP4_CREATE: u32 = 6;
pub const OP4_DELEGPURGE: u32 = 7;
pub const OP4_DELEGRETURN: u32 = 8;
pub const OP4_GETATTR: u32 = 9;
pub const OP4_GETFH: u32 = 10;
pub const OP4_LINK: u32 = 11;
pub const OP4_LOCK: u32 = 12;
pub const OP4_LOCKT: u32 = 13;
pub const OP4_LOCKU: u32 = 14;
pub const OP4_LOOKUP: u32 = 15;
pub const OP4_LOOKUPP: u32 = 16;
pub const OP4_NVERIFY: u32 = 17;
pub const OP4_OPEN: u32 = 18;
pub const OP4_OPENATTR: u32 = 19;
pub const OP4_OPEN_CONFIRM: u32 = 20;
pub const OP4_OPEN_DOWNGRADE: u32 = 21;
pub const OP4_PUTFH: u32 = 22;
pub const OP4_PUTPUBFH: u32 = 23;
pub const OP4_PUTROOTFH: u32 = 24;
pub const OP4_READ: u32 = 25;
pub const OP4_READDIR: u32 = 26;
pub const OP4_READLINK: u32 = 27;
pub const OP4_REMOVE: u32 = 28;
pub const OP4_RENAME: u32 = 29;
pub const OP4_RENEW: u32 = 30;
pub const OP4_RESTOREFH: u32 = 31;
pub const OP4_SAVEFH: u32 = 32;
pub const OP4_SECINFO: u32 = 33;
pub const OP4_SETATTR: u32 = 34;
pub const OP4_SETCLIENTID: u32 = 35;
pub const OP4_SETCLIENTID_CONFIRM: u32 = 36;
pub const OP4_VERIFY: u32 = 37;
pub const OP4_WRITE: u32 = 38;
pub const OP4_RELEASE_LOCKOWNER: u32 = 39;

pub const OP4_BACKCHANNEL_CTL: u32 = 40;
pub const OP4_BIND_CONN_TO_SESSION: u32 = 41;
pub const OP4_EXCHANGE_ID: u32 = 42;
pub const OP4_CREATE_SESSION: u32 = 43;
pub const OP4_DESTROY_SESSION: u32 = 44;
pub const OP4_FREE_STATEID: u32 = 45;
pub const OP4_GET_DIR_DELEGATION: u32 = 46;
pub const OP4_GETDEVICEINFO: u32 = 47;
pub const OP4_GETDEVICELIST: u32 = 48;
pub const OP4_LAYOUTCOMMIT: u32 = 49;
pub const OP4_LAYOUTGET: u32 = 50;
pub const OP4_LAYOUTRETURN: u32 = 51;
pub const OP4_SECINFO_NO_NAME: u32 = 52;
pub const OP4_SEQUENCE: u32 = 53;
pub const OP4_SET_SSV: u32 = 54;
pub const OP4_TEST_STATEID: u32 = 55;
pub const OP4_WANT_DELEGATION: u32 = 56;
pub const OP4_DESTROY_CLIENTID: u32 = 57;
pub const OP4_RECLAIM_COMPLETE: u32 = 58;

pub const OP4_ALLOCATE: u32 = 59;
pub const OP4_COPY: u32 = 60;
pub const OP4_COPY_NOTIFY: u32 = 61;
pub const OP4_DEALLOCATE: u32 = 62;
pub const OP4_IO_ADVISE: u32 = 63;
pub const OP4_LAYOUTERROR: u32 = 64;
pub const OP4_LAYOUTSTATS: u32 = 65;
pub const OP4_OFFLOAD_CANCEL: u32 = 66;
pub const OP4_OFFLOAD_STATUS: u32 = 67;
pub const OP4_READ_PLUS: u32 = 68;
pub const OP4_SEEK: u32 = 69;
pub const OP4_WRITE_SAME: u32 = 70;
pub const OP4_CLONE: u32 = 71;

pub const OP4_GETXATTR: u32 = 72;
pub const OP4_SETXATTR: u32 = 73;
pub const OP4_LISTXATTRS: u32 = 74;
pub const OP4_REMOVEXATTR: u32 = 75;

pub const OP4_ILLEGAL: u32 = 10044;

/// NFSv4 status codes. The server only ever encodes these, so the enum is
/// exhaustive over the codes it can produce rather than over the RFCs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat4 {
    #[default]
    NFS4_OK = 0,
    NFS4ERR_PERM = 1,
    NFS4ERR_NOENT = 2,
    NFS4ERR_IO = 5,
    NFS4ERR_NXIO = 6,
    NFS4ERR_ACCESS = 13,
    NFS4ERR_EXIST = 17,
    NFS4ERR_XDEV = 18,
    NFS4ERR_NOTDIR = 20,
    NFS4ERR_ISDIR = 21,
    NFS4ERR_INVAL = 22,
    NFS4ERR_FBIG = 27,
    NFS4ERR_NOSPC = 28,
    NFS4ERR_ROFS = 30,
    NFS4ERR_MLINK = 31,
    NFS4ERR_NAMETOOLONG = 63,
    NFS4ERR_NOTEMPTY = 66,
    NFS4ERR_DQUOT = 69,
    NFS4ERR_STALE = 70,
    NFS4ERR_BADHANDLE = 10001,
    NFS4ERR_BAD_COOKIE = 10003,
    NFS4ERR_NOTSUPP = 10004,
    NFS4ERR_TOOSMALL = 10005,
    NFS4ERR_SERVERFAULT = 10006,
    NFS4ERR_BADTYPE = 10007,
    NFS4ERR_DELAY = 10008,
    NFS4ERR_SAME = 10009,
    NFS4ERR_DENIED = 10010,
    NFS4ERR_EXPIRED = 10011,
    NFS4ERR_LOCKED = 10012,
    NFS4ERR_GRACE = 10013,
    NFS4ERR_FHEXPIRED = 10014,
    NFS4ERR_SHARE_DENIED = 10015,
    NFS4ERR_WRONGSEC = 10016,
    NFS4ERR_CLID_INUSE = 10017,
    NFS4ERR_RESOURCE = 10018,
    NFS4ERR_MOVED = 10019,
    NFS4ERR_NOFILEHANDLE = 10020,
    NFS4ERR_MINOR_VERS_MISMATCH = 10021,
    NFS4ERR_STALE_CLIENTID = 10022,
    NFS4ERR_STALE_STATEID = 10023,
    NFS4ERR_OLD_STATEID = 10024,
    NFS4ERR_BAD_STATEID = 10025,
    NFS4ERR_BAD_SEQID = 10026,
    NFS4ERR_NOT_SAME = 10027,
    NFS4ERR_LOCK_RANGE = 10028,
    NFS4ERR_SYMLINK = 10029,
    NFS4ERR_RESTOREFH = 10030,
    NFS4ERR_LEASE_MOVED = 10031,
    NFS4ERR_ATTRNOTSUPP = 10032,
    NFS4ERR_NO_GRACE = 10033,
    NFS4ERR_RECLAIM_BAD = 10034,
    NFS4ERR_RECLAIM_CONFLICT = 10035,
    NFS4ERR_BADXDR = 10036,
    NFS4ERR_LOCKS_HELD = 10037,
    NFS4ERR_OPENMODE = 10038,
    NFS4ERR_BADOWNER = 10039,
    NFS4ERR_BADCHAR = 10040,
    NFS4ERR_BADNAME = 10041,
    NFS4ERR_BAD_RANGE = 10042,
    NFS4ERR_LOCK_NOTSUPP = 10043,
    NFS4ERR_OP_ILLEGAL = 10044,
    NFS4ERR_DEADLOCK = 10045,
    NFS4ERR_FILE_OPEN = 10046,
    NFS4ERR_ADMIN_REVOKED = 10047,
    NFS4ERR_CB_PATH_DOWN = 10048,
    NFS4ERR_SEQ_MISORDERED = 10063,
    NFS4ERR_RETRY_UNCACHED_REP = 10068,
    NFS4ERR_OP_NOT_IN_SESSION = 10071,
    NFS4ERR_CLIENTID_BUSY = 10074,
    NFS4ERR_DEADSESSION = 10078,
    NFS4ERR_NOT_ONLY_OP = 10081,
    NFS4ERR_NOXATTR = 10095,
    NFS4ERR_XATTR2BIG = 10096,
}
XdrEnum!(nfsstat4);

impl nfsstat4 {
    /// True when an operation failing with this status aborts the rest of
    /// the compound; the reply header is then rewritten with the truncated
    /// operation count.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            nfsstat4::NFS4ERR_OP_ILLEGAL
                | nfsstat4::NFS4ERR_OP_NOT_IN_SESSION
                | nfsstat4::NFS4ERR_SERVERFAULT
                | nfsstat4::NFS4ERR_NOTSUPP
                | nfsstat4::NFS4ERR_FHEXPIRED
                | nfsstat4::NFS4ERR_STALE
        )
    }
}

// Object types (nfs_ftype4).
pub const NF4REG: u32 = 1;
pub const NF4DIR: u32 = 2;
pub const NF4BLK: u32 = 3;
pub const NF4CHR: u32 = 4;
pub const NF4LNK: u32 = 5;
pub const NF4SOCK: u32 = 6;
pub const NF4FIFO: u32 = 7;
pub const NF4ATTRDIR: u32 = 8;
pub const NF4NAMEDATTR: u32 = 9;

// Filehandle expiry classes (fh_expire_type attribute).
pub const FH4_PERSISTENT: u32 = 0x0000_0000;
pub const FH4_NOEXPIRE_WITH_OPEN: u32 = 0x0000_0001;
pub const FH4_VOLATILE_ANY: u32 = 0x0000_0002;
pub const FH4_VOL_MIGRATION: u32 = 0x0000_0004;
pub const FH4_VOL_RENAME: u32 = 0x0000_0008;

// ACCESS operation bits.
pub const ACCESS4_READ: u32 = 0x0000_0001;
pub const ACCESS4_LOOKUP: u32 = 0x0000_0002;
pub const ACCESS4_MODIFY: u32 = 0x0000_0004;
pub const ACCESS4_EXTEND: u32 = 0x0000_0008;
pub const ACCESS4_DELETE: u32 = 0x0000_0010;
pub const ACCESS4_EXECUTE: u32 = 0x0000_0020;
pub const ACCESS4_XAREAD: u32 = 0x0000_0040;
pub const ACCESS4_XAWRITE: u32 = 0x0000_0080;
pub const ACCESS4_XALIST: u32 = 0x0000_0100;

// ACE types and bits for the acl attribute.
pub const ACE4_ACCESS_ALLOWED_ACE_TYPE: u32 = 0x0000_0000;
pub const ACE4_ACCESS_DENIED_ACE_TYPE: u32 = 0x0000_0001;
pub const ACE4_SYSTEM_AUDIT_ACE_TYPE: u32 = 0x0000_0002;
pub const ACE4_SYSTEM_ALARM_ACE_TYPE: u32 = 0x0000_0003;

pub const ACE4_IDENTIFIER_GROUP: u32 = 0x0000_0040;

pub const ACE4_READ_DATA: u32 = 0x0000_0001;
pub const ACE4_WRITE_DATA: u32 = 0x0000_0002;
pub const ACE4_APPEND_DATA: u32 = 0x0000_0004;
pub const ACE4_READ_NAMED_ATTRS: u32 = 0x0000_0008;
pub const ACE4_WRITE_NAMED_ATTRS: u32 = 0x0000_0010;
pub const ACE4_EXECUTE: u32 = 0x0000_0020;
pub const ACE4_DELETE_CHILD: u32 = 0x0000_0040;
pub const ACE4_READ_ATTRIBUTES: u32 = 0x0000_0080;
pub const ACE4_WRITE_ATTRIBUTES: u32 = 0x0000_0100;
pub const ACE4_DELETE: u32 = 0x0001_0000;
pub const ACE4_READ_ACL: u32 = 0x0002_0000;
pub const ACE4_WRITE_ACL: u32 = 0x0004_0000;
pub const ACE4_WRITE_OWNER: u32 = 0x0008_0000;
pub const ACE4_SYNCHRONIZE: u32 = 0x0010_0000;

// OPEN share access modes.
pub const OPEN4_SHARE_ACCESS_READ: u32 = 0x0000_0001;
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 0x0000_0002;
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 0x0000_0003;

// OPEN result flags.
pub const OPEN4_RESULT_CONFIRM: u32 = 0x0000_0002;
pub const OPEN4_RESULT_LOCKTYPE_POSIX: u32 = 0x0000_0004;
pub const OPEN4_RESULT_PRESERVE_UNLINKED: u32 = 0x0000_0008;

// WRITE stability levels (stable_how4).
pub const UNSTABLE4: u32 = 0;
pub const DATA_SYNC4: u32 = 1;
pub const FILE_SYNC4: u32 = 2;

// SETXATTR options (setxattr_option4).
pub const SETXATTR4_EITHER: u32 = 0;
pub const SETXATTR4_CREATE: u32 = 1;
pub const SETXATTR4_REPLACE: u32 = 2;

// OPEN create disposition (opentype4).
pub const OPEN4_NOCREATE: u32 = 0;
pub const OPEN4_CREATE: u32 = 1;

// OPEN create modes (createmode4).
pub const UNCHECKED4: u32 = 0;
pub const GUARDED4: u32 = 1;
pub const EXCLUSIVE4: u32 = 2;
pub const EXCLUSIVE4_1: u32 = 3;

// OPEN claim types (open_claim_type4).
pub const CLAIM_NULL: u32 = 0;
pub const CLAIM_PREVIOUS: u32 = 1;
pub const CLAIM_DELEGATE_CUR: u32 = 2;
pub const CLAIM_DELEGATE_PREV: u32 = 3;
pub const CLAIM_FH: u32 = 4;
pub const CLAIM_DELEG_CUR_FH: u32 = 5;
pub const CLAIM_DELEG_PREV_FH: u32 = 6;

// Delegation types (open_delegation_type4).
pub const OPEN_DELEGATE_NONE: u32 = 0;
pub const OPEN_DELEGATE_READ: u32 = 1;
pub const OPEN_DELEGATE_WRITE: u32 = 2;
pub const OPEN_DELEGATE_NONE_EXT: u32 = 3;

// EXCHANGE_ID flags.
pub const EXCHGID4_FLAG_BIND_PRINC_STATEID: u32 = 0x0000_0100;
pub const EXCHGID4_FLAG_USE_NON_PNFS: u32 = 0x0001_0000;
pub const EXCHGID4_FLAG_UPD_CONFIRMED_REC_A: u32 = 0x4000_0000;
pub const EXCHGID4_FLAG_CONFIRMED_R: u32 = 0x8000_0000;

// CREATE_SESSION flags.
pub const CREATE_SESSION4_FLAG_PERSIST: u32 = 0x0000_0001;
pub const CREATE_SESSION4_FLAG_CONN_BACK_CHAN: u32 = 0x0000_0002;
pub const CREATE_SESSION4_FLAG_CONN_RDMA: u32 = 0x0000_0004;

// State protection modes for EXCHANGE_ID (state_protect_how4).
pub const SP4_NONE: u32 = 0;
pub const SP4_MACH_CRED: u32 = 1;
pub const SP4_SSV: u32 = 2;

/// Human-readable operation name for logging.
pub fn op_name(op: u32) -> &'static str {
    match op {
        OP4_ACCESS => "access",
        OP4_CLOSE => "close",
        OP4_COMMIT => "commit",
        OP4_CREATE => "create",
        OP4_DELEGPURGE => "delegpurge",
        OP4_DELEGRETURN => "delegreturn",
        OP4_GETATTR => "getattr",
        OP4_GETFH => "getfh",
        OP4_LINK => "link",
        OP4_LOCK => "lock",
        OP4_LOCKT => "lockt",
        OP4_LOCKU => "locku",
        OP4_LOOKUP => "lookup",
        OP4_LOOKUPP => "lookupp",
        OP4_NVERIFY => "nverify",
        OP4_OPEN => "open",
        OP4_OPENATTR => "openattr",
        OP4_OPEN_CONFIRM => "open_confirm",
        OP4_OPEN_DOWNGRADE => "open_downgrade",
        OP4_PUTFH => "putfh",
        OP4_PUTPUBFH => "putpubfh",
        OP4_PUTROOTFH => "putrootfh",
        OP4_READ => "read",
        OP4_READDIR => "readdir",
        OP4_READLINK => "readlink",
        OP4_REMOVE => "remove",
        OP4_RENAME => "rename",
        OP4_RENEW => "renew",
        OP4_RESTOREFH => "restorefh",
        OP4_SAVEFH => "savefh",
        OP4_SECINFO => "secinfo",
        OP4_SETATTR => "setattr",
        OP4_SETCLIENTID => "setclientid",
        OP4_SETCLIENTID_CONFIRM => "setclientid_confirm",
        OP4_VERIFY => "verify",
        OP4_WRITE => "write",
        OP4_RELEASE_LOCKOWNER => "release_lockowner",
        OP4_BACKCHANNEL_CTL => "backchannel_ctl",
        OP4_BIND_CONN_TO_SESSION => "bind_conn_to_session",
        OP4_EXCHANGE_ID => "exchange_id",
        OP4_CREATE_SESSION => "create_session",
        OP4_DESTROY_SESSION => "destroy_session",
        OP4_FREE_STATEID => "free_stateid",
        OP4_SECINFO_NO_NAME => "secinfo_no_name",
        OP4_SEQUENCE => "sequence",
        OP4_TEST_STATEID => "test_stateid",
        OP4_WANT_DELEGATION => "want_delegation",
        OP4_DESTROY_CLIENTID => "destroy_clientid",
        OP4_RECLAIM_COMPLETE => "reclaim_complete",
        OP4_GETXATTR => "getxattr",
        OP4_SETXATTR => "setxattr",
        OP4_LISTXATTRS => "listxattrs",
        OP4_REMOVEXATTR => "removexattr",
        OP4_ILLEGAL => "illegal",
        _ => "unknown",
    }
}
