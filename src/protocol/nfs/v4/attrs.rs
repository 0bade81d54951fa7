//! Encoding and decoding of NFSv4 attribute vectors.
//!
//! An attribute vector is a bitmap naming attribute ids plus the
//! concatenated XDR values of those attributes in ascending id order.
//! [`encode_attrs`] renders file metadata into the vector a client asked
//! for, silently dropping requested-but-unsupported ids from the returned
//! mask as the protocol prescribes. [`decode_attrs`] walks an incoming
//! vector (SETATTR, CREATE, OPEN create modes), consuming every recognised
//! attribute so later fields stay aligned, and surfaces the handful the
//! server acts on.

use std::time::{Duration, SystemTime};

use tracing::warn;

use super::bitmap::Bitmap;
use crate::auth::Creds;
use crate::clients::CLIENT_EXPIRATION;
use crate::protocol::xdr::nfs4::{
    self, fattr4, fsid4, nfsace4, nfsstat4, nfstime4, settime4, specdata4,
};
use crate::protocol::xdr::{deserialize, Serialize};
use crate::vfs::FileInfo;

// Attribute ids (RFC 7530 §5, RFC 5661 §5, RFC 8276 §7).
pub const A_SUPPORTED_ATTRS: u32 = 0; // bitmap4
pub const A_TYPE: u32 = 1; // nfs_ftype4
pub const A_FH_EXPIRE_TYPE: u32 = 2; // uint32
pub const A_CHANGE: u32 = 3; // changeid4
pub const A_SIZE: u32 = 4; // uint64
pub const A_LINK_SUPPORT: u32 = 5; // bool
pub const A_SYMLINK_SUPPORT: u32 = 6; // bool
pub const A_NAMED_ATTR: u32 = 7; // bool
pub const A_FSID: u32 = 8; // fsid4
pub const A_UNIQUE_HANDLES: u32 = 9; // bool
pub const A_LEASE_TIME: u32 = 10; // nfs_lease4
pub const A_RDATTR_ERROR: u32 = 11; // nfsstat4
pub const A_ACL: u32 = 12; // nfsace4<>
pub const A_ACLSUPPORT: u32 = 13; // uint32
pub const A_CASE_INSENSITIVE: u32 = 16; // bool
pub const A_CASE_PRESERVING: u32 = 17; // bool
pub const A_CHOWN_RESTRICTED: u32 = 18; // bool
pub const A_FILEHANDLE: u32 = 19; // nfs_fh4
pub const A_FILEID: u32 = 20; // uint64
pub const A_MAXNAME: u32 = 29; // uint32
pub const A_MAXREAD: u32 = 30; // uint64
pub const A_MAXWRITE: u32 = 31; // uint64
pub const A_MODE: u32 = 33; // uint32
pub const A_NO_TRUNC: u32 = 34; // bool
pub const A_NUMLINKS: u32 = 35; // uint32
pub const A_OWNER: u32 = 36; // string
pub const A_OWNER_GROUP: u32 = 37; // string
pub const A_RAWDEV: u32 = 41; // specdata4
pub const A_SPACE_USED: u32 = 45; // uint64
pub const A_TIME_ACCESS: u32 = 47; // nfstime4
pub const A_TIME_METADATA: u32 = 52; // nfstime4
pub const A_TIME_MODIFY: u32 = 53; // nfstime4
pub const A_TIME_MODIFY_SET: u32 = 54; // settime4
pub const A_MOUNTED_ON_FILEID: u32 = 55; // uint64
pub const A_SUPPATTR_EXCLCREAT: u32 = 75; // bitmap4 (v4.1)
pub const A_XATTR_SUPPORT: u32 = 82; // bool (v4.2)

/// Every attribute id the server can return. Requested ids outside this
/// set are dropped from the answered mask, not an error.
pub const ATTRS_SUPPORTED: [u32; 33] = [
    A_SUPPORTED_ATTRS,
    A_TYPE,
    A_FH_EXPIRE_TYPE,
    A_CHANGE,
    A_SIZE,
    A_LINK_SUPPORT,
    A_SYMLINK_SUPPORT,
    A_NAMED_ATTR,
    A_FSID,
    A_UNIQUE_HANDLES,
    A_LEASE_TIME,
    A_RDATTR_ERROR,
    A_ACL,
    A_ACLSUPPORT,
    A_CASE_INSENSITIVE,
    A_CASE_PRESERVING,
    A_CHOWN_RESTRICTED,
    A_FILEHANDLE,
    A_FILEID,
    A_MAXNAME,
    A_MAXREAD,
    A_MAXWRITE,
    A_MODE,
    A_NO_TRUNC,
    A_NUMLINKS,
    A_OWNER,
    A_OWNER_GROUP,
    A_RAWDEV,
    A_SPACE_USED,
    A_TIME_ACCESS,
    A_TIME_METADATA,
    A_TIME_MODIFY,
    A_MOUNTED_ON_FILEID,
];

// Extra ids handled by the encoder beyond the v4.0 core.
const ATTRS_SUPPORTED_EXTRA: [u32; 2] = [A_SUPPATTR_EXCLCREAT, A_XATTR_SUPPORT];

pub(crate) fn supported(id: u32) -> bool {
    ATTRS_SUPPORTED.contains(&id) || ATTRS_SUPPORTED_EXTRA.contains(&id)
}

/// Attribute name for logging.
pub fn attr_name(id: u32) -> &'static str {
    match id {
        A_SUPPORTED_ATTRS => "supported_attrs",
        A_TYPE => "type",
        A_FH_EXPIRE_TYPE => "fh_expire_type",
        A_CHANGE => "change",
        A_SIZE => "size",
        A_LINK_SUPPORT => "link_support",
        A_SYMLINK_SUPPORT => "symlink_support",
        A_NAMED_ATTR => "named_attr",
        A_FSID => "fsid",
        A_UNIQUE_HANDLES => "unique_handles",
        A_LEASE_TIME => "lease_time",
        A_RDATTR_ERROR => "rdattr_error",
        A_ACL => "acl",
        A_ACLSUPPORT => "aclsupport",
        A_CASE_INSENSITIVE => "case_insensitive",
        A_CASE_PRESERVING => "case_preserving",
        A_CHOWN_RESTRICTED => "chown_restricted",
        A_FILEHANDLE => "filehandle",
        A_FILEID => "fileid",
        A_MAXNAME => "maxname",
        A_MAXREAD => "maxread",
        A_MAXWRITE => "maxwrite",
        A_MODE => "mode",
        A_NO_TRUNC => "no_trunc",
        A_NUMLINKS => "numlinks",
        A_OWNER => "owner",
        A_OWNER_GROUP => "owner_group",
        A_RAWDEV => "rawdev",
        A_SPACE_USED => "space_used",
        A_TIME_ACCESS => "time_access",
        A_TIME_METADATA => "time_metadata",
        A_TIME_MODIFY => "time_modify",
        A_TIME_MODIFY_SET => "time_modify_set",
        A_MOUNTED_ON_FILEID => "mounted_on_fileid",
        A_SUPPATTR_EXCLCREAT => "suppattr_exclcreat",
        A_XATTR_SUPPORT => "xattr_support",
        _ => "unknown",
    }
}

fn supported_bitmap() -> Bitmap {
    Bitmap::from_ids(ATTRS_SUPPORTED.into_iter().chain(ATTRS_SUPPORTED_EXTRA))
}

fn nfstime(t: SystemTime) -> nfstime4 {
    let since = t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    nfstime4 { seconds: since.as_secs(), nseconds: since.subsec_nanos() }
}

pub(crate) fn system_time(t: nfstime4) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::new(t.seconds, t.nseconds)
}

/// The `fileid` and `mounted_on_fileid` values: the trailing eight handle
/// bytes read little-endian, sliding the window left while it reads zero.
/// A handle with no nonzero window yields `u64::MAX`.
fn file_id_from_handle(handle: &[u8]) -> u64 {
    let mut window = handle.to_vec();

    if window.len() < 8 {
        window.resize(8, 0);
    }

    let mut fileid = 0_u64;

    while fileid == 0 && window.len() >= 8 {
        fileid = u64::from_le_bytes(
            window[window.len() - 8..].try_into().expect("8-byte window"),
        );
        window.pop();
    }

    if fileid == 0 {
        fileid = u64::MAX;
    }

    fileid
}

/// Renders the requested attributes of one object into a `fattr4`.
///
/// `rdattr_status` feeds the `rdattr_error` attribute; READDIR passes the
/// handle-resolution status of each entry. The `change` value mixes the
/// modification time with the caller's uid and the worker's session
/// verifier: each uid sees an independent view of the tree, and a worker
/// reincarnation forces clients to revalidate everything they cached.
pub fn encode_attrs(
    handle: &[u8],
    info: &FileInfo,
    rdattr_status: nfsstat4,
    requested: &Bitmap,
    creds: &Creds,
    session_verifier: u64,
) -> fattr4 {
    let mut returned = Bitmap::default();
    let mut vals: Vec<u8> = Vec::new();

    for id in requested.ids() {
        if !supported(id) {
            warn!("attr requested but not supported: {id}");
            continue;
        }

        returned.insert(id);

        // Infallible: every arm writes into a Vec.
        let _ = encode_one(&mut vals, id, handle, info, rdattr_status, creds, session_verifier);
    }

    fattr4 { attrmask: returned.words(), attr_vals: vals }
}

fn encode_one(
    out: &mut Vec<u8>,
    id: u32,
    handle: &[u8],
    info: &FileInfo,
    rdattr_status: nfsstat4,
    creds: &Creds,
    session_verifier: u64,
) -> std::io::Result<()> {
    match id {
        A_SUPPORTED_ATTRS | A_SUPPATTR_EXCLCREAT => supported_bitmap().words().serialize(out),

        A_TYPE => info.nfs_type().serialize(out),

        A_FH_EXPIRE_TYPE => {
            (nfs4::FH4_VOLATILE_ANY | nfs4::FH4_NOEXPIRE_WITH_OPEN).serialize(out)
        }

        A_CHANGE => {
            // Clients assume one global view of the tree, while this server
            // serves an independent view per uid.
            let changeid = crate::clock::unix_seconds(info.mtime)
                .wrapping_mul(u64::from(u32::MAX))
                .wrapping_add(u64::from(creds.uid))
                .wrapping_add(session_verifier);
            changeid.serialize(out)
        }

        A_SIZE => info.size.serialize(out),

        A_LINK_SUPPORT | A_SYMLINK_SUPPORT | A_CASE_PRESERVING | A_CHOWN_RESTRICTED
        | A_NO_TRUNC => true.serialize(out),

        A_NAMED_ATTR | A_CASE_INSENSITIVE | A_UNIQUE_HANDLES => false.serialize(out),

        A_FSID => fsid4 { major: 1, minor: 1 }.serialize(out),

        A_LEASE_TIME => (CLIENT_EXPIRATION.as_secs() as u32).serialize(out),

        A_RDATTR_ERROR => rdattr_status.serialize(out),

        A_ACLSUPPORT | A_XATTR_SUPPORT => 1_u32.serialize(out),

        A_ACL => {
            let acl = vec![
                nfsace4 {
                    acetype: nfs4::ACE4_ACCESS_ALLOWED_ACE_TYPE,
                    flag: 0,
                    access_mask: nfs4::ACE4_WRITE_OWNER
                        | nfs4::ACE4_WRITE_ACL
                        | nfs4::ACE4_WRITE_DATA
                        | nfs4::ACE4_READ_ACL
                        | nfs4::ACE4_READ_DATA,
                    who: "OWNER@".to_string(),
                },
                nfsace4 {
                    acetype: nfs4::ACE4_ACCESS_ALLOWED_ACE_TYPE,
                    flag: nfs4::ACE4_IDENTIFIER_GROUP,
                    access_mask: nfs4::ACE4_READ_ACL | nfs4::ACE4_READ_DATA,
                    who: "GROUP@".to_string(),
                },
                nfsace4 {
                    acetype: nfs4::ACE4_ACCESS_ALLOWED_ACE_TYPE,
                    flag: 0,
                    access_mask: 0,
                    who: "EVERYONE@".to_string(),
                },
            ];
            acl.serialize(out)
        }

        A_FILEHANDLE => handle.serialize(out),

        A_FILEID | A_MOUNTED_ON_FILEID => file_id_from_handle(handle).serialize(out),

        A_MAXNAME => 255_u32.serialize(out),

        A_MAXREAD | A_MAXWRITE => (32 * 1024_u64).serialize(out),

        A_MODE => info.perm().serialize(out),

        A_NUMLINKS => {
            // Must be > 0: clients treat a zero-link root as a stale handle.
            info.nlink.max(1).serialize(out)
        }

        A_OWNER => info.uid.to_string().serialize(out),

        A_OWNER_GROUP => info.gid.to_string().serialize(out),

        A_RAWDEV => specdata4::default().serialize(out),

        A_SPACE_USED => (4096 + info.size).serialize(out),

        A_TIME_ACCESS | A_TIME_METADATA | A_TIME_MODIFY => nfstime(info.mtime).serialize(out),

        other => {
            warn!("requested attr {} not handled", attr_name(other));
            Ok(())
        }
    }
}

/// The writable attributes the server recognises in an incoming vector.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodedAttrs {
    pub mode: Option<u32>,
    pub size: Option<u64>,
    pub owner: Option<String>,
    pub owner_group: Option<String>,
    /// An explicit modification time, from `time_modify_set` with a client
    /// time or from a literal time attribute. Absent when the client asked
    /// for the server's clock.
    pub time_modify: Option<nfstime4>,
}

/// Walks an incoming attribute vector. Every attribute the server knows how
/// to skip is consumed so the cursor stays aligned; the writable subset
/// lands in [`DecodedAttrs`].
pub fn decode_attrs(attr: &fattr4) -> std::io::Result<DecodedAttrs> {
    let mut decoded = DecodedAttrs::default();
    let mask = Bitmap::from_words(&attr.attrmask);
    let src = &mut attr.attr_vals.as_slice();

    for id in mask.ids() {
        match id {
            A_SUPPORTED_ATTRS | A_SUPPATTR_EXCLCREAT => {
                deserialize::<Vec<u32>>(src)?;
            }
            A_TYPE | A_FH_EXPIRE_TYPE | A_LEASE_TIME | A_RDATTR_ERROR | A_ACLSUPPORT
            | A_NUMLINKS | A_MAXNAME => {
                deserialize::<u32>(src)?;
            }
            A_CHANGE | A_SPACE_USED | A_FILEID | A_MOUNTED_ON_FILEID | A_MAXREAD
            | A_MAXWRITE => {
                deserialize::<u64>(src)?;
            }
            A_LINK_SUPPORT | A_SYMLINK_SUPPORT | A_NAMED_ATTR | A_UNIQUE_HANDLES
            | A_CASE_INSENSITIVE | A_CASE_PRESERVING | A_CHOWN_RESTRICTED | A_NO_TRUNC
            | A_XATTR_SUPPORT => {
                deserialize::<bool>(src)?;
            }
            A_FSID => {
                deserialize::<fsid4>(src)?;
            }
            A_RAWDEV => {
                deserialize::<specdata4>(src)?;
            }
            A_ACL => {
                deserialize::<Vec<nfsace4>>(src)?;
            }
            A_FILEHANDLE => {
                deserialize::<Vec<u8>>(src)?;
            }
            A_SIZE => decoded.size = Some(deserialize(src)?),
            A_MODE => decoded.mode = Some(deserialize(src)?),
            A_OWNER => decoded.owner = Some(deserialize(src)?),
            A_OWNER_GROUP => decoded.owner_group = Some(deserialize(src)?),
            A_TIME_ACCESS | A_TIME_METADATA | A_TIME_MODIFY => {
                let time = deserialize::<nfstime4>(src)?;
                if id != A_TIME_ACCESS {
                    decoded.time_modify = Some(time);
                }
            }
            A_TIME_MODIFY_SET => match deserialize::<settime4>(src)? {
                settime4::ClientTime(time) => decoded.time_modify = Some(time),
                settime4::ServerTime => {}
            },
            other => {
                warn!("cannot decode attr {}, skipping rest of vector", attr_name(other));
                return Ok(decoded);
            }
        }
    }

    Ok(decoded)
}
