//! Typed COMPOUND argument and result structures.
//!
//! Plain structs are serialized field by field through the codec macros.
//! NFSv4 unions (`createtype4`, `openflag4`, `createhow4`, `open_claim4`,
//! `state_protect4`, `settime4`, …) are Rust enums whose codec impls write
//! the 32-bit discriminant followed by the selected arm and reject
//! out-of-range discriminants on decode.

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use super::{
    CLAIM_DELEGATE_CUR, CLAIM_DELEGATE_PREV, CLAIM_DELEG_CUR_FH, CLAIM_DELEG_PREV_FH, CLAIM_FH,
    CLAIM_NULL, CLAIM_PREVIOUS,
};
use crate::protocol::xdr::{
    deserialize, invalid_data, union_discriminant, Deserialize, Serialize,
};
use crate::{DeserializeStruct, SerializeStruct};

/// Major/minor pair identifying the filesystem an object lives on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct fsid4 {
    pub major: u64,
    pub minor: u64,
}
SerializeStruct!(fsid4, major, minor);
DeserializeStruct!(fsid4, major, minor);

/// Device numbers for block and character specials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct specdata4 {
    pub specdata1: u32,
    pub specdata2: u32,
}
SerializeStruct!(specdata4, specdata1, specdata2);
DeserializeStruct!(specdata4, specdata1, specdata2);

/// Seconds and nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct nfstime4 {
    pub seconds: u64,
    pub nseconds: u32,
}
SerializeStruct!(nfstime4, seconds, nseconds);
DeserializeStruct!(nfstime4, seconds, nseconds);

/// An attribute vector: the bitmap of attribute ids present, then the
/// concatenated XDR encodings of those attributes in ascending id order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct fattr4 {
    pub attrmask: Vec<u32>,
    pub attr_vals: Vec<u8>,
}
SerializeStruct!(fattr4, attrmask, attr_vals);
DeserializeStruct!(fattr4, attrmask, attr_vals);

/// An access control entry of the `acl` attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfsace4 {
    pub acetype: u32,
    pub flag: u32,
    pub access_mask: u32,
    pub who: String,
}
SerializeStruct!(nfsace4, acetype, flag, access_mask, who);
DeserializeStruct!(nfsace4, acetype, flag, access_mask, who);

/// 128-bit open-state token: a sequence number plus 96 opaque bits. This
/// server packs the 64-bit file id into `other[0..2]` and the client's OPEN
/// sequence id into `other[2]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct stateid4 {
    pub seqid: u32,
    pub other: [u32; 3],
}
SerializeStruct!(stateid4, seqid, other);
DeserializeStruct!(stateid4, seqid, other);

/// Directory change cookie pair. This server never tracks before/after
/// atomically and always answers zeroes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct change_info4 {
    pub atomic: bool,
    pub before: u64,
    pub after: u64,
}
SerializeStruct!(change_info4, atomic, before, after);
DeserializeStruct!(change_info4, atomic, before, after);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETATTR4args {
    pub attr_request: Vec<u32>,
}
SerializeStruct!(GETATTR4args, attr_request);
DeserializeStruct!(GETATTR4args, attr_request);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETATTR4resok {
    pub obj_attributes: fattr4,
}
SerializeStruct!(GETATTR4resok, obj_attributes);
DeserializeStruct!(GETATTR4resok, obj_attributes);

/// Client identity presented to SETCLIENTID: a boot verifier plus an
/// opaque, client-chosen name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfs_client_id4 {
    pub verifier: u64,
    pub id: Vec<u8>,
}
SerializeStruct!(nfs_client_id4, verifier, id);
DeserializeStruct!(nfs_client_id4, verifier, id);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct clientaddr4 {
    pub netid: String,
    pub addr: String,
}
SerializeStruct!(clientaddr4, netid, addr);
DeserializeStruct!(clientaddr4, netid, addr);

/// Callback channel description. Decoded, logged, otherwise ignored: this
/// server grants no delegations and never calls back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct cb_client4 {
    pub cb_program: u32,
    pub cb_location: clientaddr4,
}
SerializeStruct!(cb_client4, cb_program, cb_location);
DeserializeStruct!(cb_client4, cb_program, cb_location);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID4args {
    pub client: nfs_client_id4,
    pub callback: cb_client4,
    pub callback_ident: u32,
}
SerializeStruct!(SETCLIENTID4args, client, callback, callback_ident);
DeserializeStruct!(SETCLIENTID4args, client, callback, callback_ident);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID4resok {
    pub clientid: u64,
    pub setclientid_confirm: u64,
}
SerializeStruct!(SETCLIENTID4resok, clientid, setclientid_confirm);
DeserializeStruct!(SETCLIENTID4resok, clientid, setclientid_confirm);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID_CONFIRM4args {
    pub clientid: u64,
    pub setclientid_confirm: u64,
}
SerializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);
DeserializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PUTFH4args {
    pub object: Vec<u8>,
}
SerializeStruct!(PUTFH4args, object);
DeserializeStruct!(PUTFH4args, object);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOOKUP4args {
    pub objname: String,
}
SerializeStruct!(LOOKUP4args, objname);
DeserializeStruct!(LOOKUP4args, objname);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETFH4resok {
    pub object: Vec<u8>,
}
SerializeStruct!(GETFH4resok, object);
DeserializeStruct!(GETFH4resok, object);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ACCESS4args {
    pub access: u32,
}
SerializeStruct!(ACCESS4args, access);
DeserializeStruct!(ACCESS4args, access);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ACCESS4resok {
    pub supported: u32,
    pub access: u32,
}
SerializeStruct!(ACCESS4resok, supported, access);
DeserializeStruct!(ACCESS4resok, supported, access);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READDIR4args {
    pub cookie: u64,
    pub cookieverf: u64,
    /// Byte budget for names and cookies alone.
    pub dircount: u32,
    /// Byte budget for the entire result, attributes included.
    pub maxcount: u32,
    pub attr_request: Vec<u32>,
}
SerializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);
DeserializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);

/// One directory entry; entries chain through `nextentry`, which encodes as
/// the XDR optional linked list the RFC prescribes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct entry4 {
    pub cookie: u64,
    pub name: String,
    pub attrs: fattr4,
    pub nextentry: Option<Box<entry4>>,
}
SerializeStruct!(entry4, cookie, name, attrs, nextentry);
DeserializeStruct!(entry4, cookie, name, attrs, nextentry);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct dirlist4 {
    pub entries: Option<Box<entry4>>,
    pub eof: bool,
}
SerializeStruct!(dirlist4, entries, eof);
DeserializeStruct!(dirlist4, entries, eof);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READDIR4resok {
    pub cookieverf: u64,
    pub reply: dirlist4,
}
SerializeStruct!(READDIR4resok, cookieverf, reply);
DeserializeStruct!(READDIR4resok, cookieverf, reply);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SECINFO4args {
    pub name: String,
}
SerializeStruct!(SECINFO4args, name);
DeserializeStruct!(SECINFO4args, name);

/// One security mechanism the server accepts. Only AUTH_UNIX is ever
/// advertised, so the RPCSEC_GSS arm never materialises.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct secinfo4 {
    pub flavor: u32,
}
SerializeStruct!(secinfo4, flavor);
DeserializeStruct!(secinfo4, flavor);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SECINFO4resok {
    pub items: Vec<secinfo4>,
}
SerializeStruct!(SECINFO4resok, items);
DeserializeStruct!(SECINFO4resok, items);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENEW4args {
    pub clientid: u64,
}
SerializeStruct!(RENEW4args, clientid);
DeserializeStruct!(RENEW4args, clientid);

/// Long-form client identity used by EXCHANGE_ID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct client_owner4 {
    pub verifier: u64,
    pub ownerid: Vec<u8>,
}
SerializeStruct!(client_owner4, verifier, ownerid);
DeserializeStruct!(client_owner4, verifier, ownerid);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct state_protect_ops4 {
    pub spo_must_enforce: Vec<u32>,
    pub spo_must_allow: Vec<u32>,
}
SerializeStruct!(state_protect_ops4, spo_must_enforce, spo_must_allow);
DeserializeStruct!(state_protect_ops4, spo_must_enforce, spo_must_allow);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ssv_sp_parms4 {
    pub ops: state_protect_ops4,
    pub hash_algs: Vec<String>,
    pub encr_algs: Vec<String>,
    pub window: u32,
    pub num_gss_handles: u32,
}
SerializeStruct!(ssv_sp_parms4, ops, hash_algs, encr_algs, window, num_gss_handles);
DeserializeStruct!(ssv_sp_parms4, ops, hash_algs, encr_algs, window, num_gss_handles);

/// State protection negotiation (EXCHANGE_ID). The server always answers
/// with `None`; the other arms exist so client requests decode cleanly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum state_protect4 {
    #[default]
    None,
    MachCred(state_protect_ops4),
    Ssv(ssv_sp_parms4),
}

impl Serialize for state_protect4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            state_protect4::None => super::SP4_NONE.serialize(dest),
            state_protect4::MachCred(ops) => {
                super::SP4_MACH_CRED.serialize(dest)?;
                ops.serialize(dest)
            }
            state_protect4::Ssv(parms) => {
                super::SP4_SSV.serialize(dest)?;
                parms.serialize(dest)
            }
        }
    }
}

impl Deserialize for state_protect4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match union_discriminant(src, 3)? {
            super::SP4_NONE => state_protect4::None,
            super::SP4_MACH_CRED => state_protect4::MachCred(deserialize(src)?),
            _ => state_protect4::Ssv(deserialize(src)?),
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct server_owner4 {
    pub minor_id: u64,
    pub major_id: String,
}
SerializeStruct!(server_owner4, minor_id, major_id);
DeserializeStruct!(server_owner4, minor_id, major_id);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfs_impl_id4 {
    pub domain: String,
    pub name: String,
    pub date: nfstime4,
}
SerializeStruct!(nfs_impl_id4, domain, name, date);
DeserializeStruct!(nfs_impl_id4, domain, name, date);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EXCHANGE_ID4args {
    pub client_owner: client_owner4,
    pub flags: u32,
    pub state_protect: state_protect4,
    pub client_impl_id: Option<nfs_impl_id4>,
}
SerializeStruct!(EXCHANGE_ID4args, client_owner, flags, state_protect, client_impl_id);
DeserializeStruct!(EXCHANGE_ID4args, client_owner, flags, state_protect, client_impl_id);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EXCHANGE_ID4resok {
    pub clientid: u64,
    pub sequenceid: u32,
    pub flags: u32,
    pub state_protect: state_protect4,
    pub server_owner: server_owner4,
    pub server_scope: Vec<u8>,
    pub server_impl_id: Option<nfs_impl_id4>,
}
SerializeStruct!(
    EXCHANGE_ID4resok,
    clientid,
    sequenceid,
    flags,
    state_protect,
    server_owner,
    server_scope,
    server_impl_id
);
DeserializeStruct!(
    EXCHANGE_ID4resok,
    clientid,
    sequenceid,
    flags,
    state_protect,
    server_owner,
    server_scope,
    server_impl_id
);

/// Fore/back channel attributes negotiated by CREATE_SESSION. The server
/// echoes them back with padding and RDMA scrubbed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct channel_attrs4 {
    pub ca_headerpadsize: u32,
    pub ca_maxrequestsize: u32,
    pub ca_maxresponsesize: u32,
    pub ca_maxresponsesize_cached: u32,
    pub ca_maxoperations: u32,
    pub ca_maxrequests: u32,
    pub ca_rdma_ird: Vec<u32>,
}
SerializeStruct!(
    channel_attrs4,
    ca_headerpadsize,
    ca_maxrequestsize,
    ca_maxresponsesize,
    ca_maxresponsesize_cached,
    ca_maxoperations,
    ca_maxrequests,
    ca_rdma_ird
);
DeserializeStruct!(
    channel_attrs4,
    ca_headerpadsize,
    ca_maxrequestsize,
    ca_maxresponsesize,
    ca_maxresponsesize_cached,
    ca_maxoperations,
    ca_maxrequests,
    ca_rdma_ird
);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE_SESSION4args {
    pub clientid: u64,
    pub sequenceid: u32,
    pub flags: u32,
    pub fore_chan_attrs: channel_attrs4,
    pub back_chan_attrs: channel_attrs4,
    pub cb_program: u32,
    /// Callback security parameters, kept opaque: no delegations means the
    /// callback channel is never exercised.
    pub sec_parms: Vec<u8>,
}
SerializeStruct!(
    CREATE_SESSION4args,
    clientid,
    sequenceid,
    flags,
    fore_chan_attrs,
    back_chan_attrs,
    cb_program,
    sec_parms
);
DeserializeStruct!(
    CREATE_SESSION4args,
    clientid,
    sequenceid,
    flags,
    fore_chan_attrs,
    back_chan_attrs,
    cb_program,
    sec_parms
);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE_SESSION4resok {
    pub sessionid: [u8; 16],
    pub sequenceid: u32,
    pub flags: u32,
    pub fore_chan_attrs: channel_attrs4,
    pub back_chan_attrs: channel_attrs4,
}
SerializeStruct!(
    CREATE_SESSION4resok,
    sessionid,
    sequenceid,
    flags,
    fore_chan_attrs,
    back_chan_attrs
);
DeserializeStruct!(
    CREATE_SESSION4resok,
    sessionid,
    sequenceid,
    flags,
    fore_chan_attrs,
    back_chan_attrs
);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SEQUENCE4args {
    pub sessionid: [u8; 16],
    pub sequenceid: u32,
    pub slotid: u32,
    pub highest_slotid: u32,
    pub cachethis: bool,
}
SerializeStruct!(SEQUENCE4args, sessionid, sequenceid, slotid, highest_slotid, cachethis);
DeserializeStruct!(SEQUENCE4args, sessionid, sequenceid, slotid, highest_slotid, cachethis);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SEQUENCE4resok {
    pub sessionid: [u8; 16],
    pub sequenceid: u32,
    pub slotid: u32,
    pub highest_slotid: u32,
    pub target_highest_slotid: u32,
    pub status_flags: u32,
}
SerializeStruct!(
    SEQUENCE4resok,
    sessionid,
    sequenceid,
    slotid,
    highest_slotid,
    target_highest_slotid,
    status_flags
);
DeserializeStruct!(
    SEQUENCE4resok,
    sessionid,
    sequenceid,
    slotid,
    highest_slotid,
    target_highest_slotid,
    status_flags
);

/// CREATE object type. The discriminant is the `nfs_ftype4` value; only
/// symlinks carry link data and only devices carry specdata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum createtype4 {
    /// Discriminant 0 is defined by no RFC but tolerated on decode so a
    /// malformed CREATE fails with BADTYPE rather than killing the
    /// connection.
    #[default]
    Unspecified,
    Regular,
    Directory,
    BlockDevice(specdata4),
    CharDevice(specdata4),
    Symlink(String),
    Socket,
    Fifo,
}

impl createtype4 {
    /// The `nfs_ftype4` discriminant for this arm.
    pub fn obj_type(&self) -> u32 {
        match self {
            createtype4::Unspecified => 0,
            createtype4::Regular => super::NF4REG,
            createtype4::Directory => super::NF4DIR,
            createtype4::BlockDevice(_) => super::NF4BLK,
            createtype4::CharDevice(_) => super::NF4CHR,
            createtype4::Symlink(_) => super::NF4LNK,
            createtype4::Socket => super::NF4SOCK,
            createtype4::Fifo => super::NF4FIFO,
        }
    }
}

impl Serialize for createtype4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.obj_type().serialize(dest)?;
        match self {
            createtype4::BlockDevice(dev) | createtype4::CharDevice(dev) => dev.serialize(dest),
            createtype4::Symlink(target) => target.serialize(dest),
            _ => Ok(()),
        }
    }
}

impl Deserialize for createtype4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match union_discriminant(src, 8)? {
            0 => createtype4::Unspecified,
            super::NF4REG => createtype4::Regular,
            super::NF4DIR => createtype4::Directory,
            super::NF4BLK => createtype4::BlockDevice(deserialize(src)?),
            super::NF4CHR => createtype4::CharDevice(deserialize(src)?),
            super::NF4LNK => createtype4::Symlink(deserialize(src)?),
            super::NF4SOCK => createtype4::Socket,
            _ => createtype4::Fifo,
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE4args {
    pub objtype: createtype4,
    pub objname: String,
    pub createattrs: fattr4,
}
SerializeStruct!(CREATE4args, objtype, objname, createattrs);
DeserializeStruct!(CREATE4args, objtype, objname, createattrs);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE4resok {
    pub cinfo: change_info4,
    pub attrset: Vec<u32>,
}
SerializeStruct!(CREATE4resok, cinfo, attrset);
DeserializeStruct!(CREATE4resok, cinfo, attrset);

/// The open owner: which client, and an opaque per-owner tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_owner4 {
    pub clientid: u64,
    pub owner: Vec<u8>,
}
SerializeStruct!(open_owner4, clientid, owner);
DeserializeStruct!(open_owner4, clientid, owner);

/// Attributes plus verifier for EXCLUSIVE4_1 creates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct creatverfattr {
    pub cva_verf: u64,
    pub cva_attrs: fattr4,
}
SerializeStruct!(creatverfattr, cva_verf, cva_attrs);
DeserializeStruct!(creatverfattr, cva_verf, cva_attrs);

/// How OPEN should create the file, when it creates at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum createhow4 {
    Unchecked4(fattr4),
    Guarded4(fattr4),
    Exclusive4(u64),
    Exclusive4_1(creatverfattr),
}

impl Default for createhow4 {
    fn default() -> Self {
        createhow4::Unchecked4(fattr4::default())
    }
}

impl Serialize for createhow4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            createhow4::Unchecked4(attrs) => {
                super::UNCHECKED4.serialize(dest)?;
                attrs.serialize(dest)
            }
            createhow4::Guarded4(attrs) => {
                super::GUARDED4.serialize(dest)?;
                attrs.serialize(dest)
            }
            createhow4::Exclusive4(verf) => {
                super::EXCLUSIVE4.serialize(dest)?;
                verf.serialize(dest)
            }
            createhow4::Exclusive4_1(cva) => {
                super::EXCLUSIVE4_1.serialize(dest)?;
                cva.serialize(dest)
            }
        }
    }
}

impl Deserialize for createhow4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match union_discriminant(src, 4)? {
            super::UNCHECKED4 => createhow4::Unchecked4(deserialize(src)?),
            super::GUARDED4 => createhow4::Guarded4(deserialize(src)?),
            super::EXCLUSIVE4 => createhow4::Exclusive4(deserialize(src)?),
            _ => createhow4::Exclusive4_1(deserialize(src)?),
        };
        Ok(())
    }
}

/// Whether OPEN may create the target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum openflag4 {
    #[default]
    NoCreate,
    Create(createhow4),
}

impl Serialize for openflag4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            openflag4::NoCreate => super::OPEN4_NOCREATE.serialize(dest),
            openflag4::Create(how) => {
                super::OPEN4_CREATE.serialize(dest)?;
                how.serialize(dest)
            }
        }
    }
}

impl Deserialize for openflag4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match union_discriminant(src, 2)? {
            super::OPEN4_NOCREATE => openflag4::NoCreate,
            _ => openflag4::Create(deserialize(src)?),
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_claim_delegate_cur4 {
    pub delegate_stateid: stateid4,
    pub file: String,
}
SerializeStruct!(open_claim_delegate_cur4, delegate_stateid, file);
DeserializeStruct!(open_claim_delegate_cur4, delegate_stateid, file);

/// What an OPEN claims to open. Only `Null` (by name) and `Fh` (the current
/// filehandle, v4.1) are served; the delegation claims decode but answer
/// NOTSUPP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum open_claim4 {
    Null(String),
    Previous(u32),
    DelegateCur(open_claim_delegate_cur4),
    DelegatePrev(String),
    Fh,
    DelegCurFh(stateid4),
    DelegPrevFh,
}

impl Default for open_claim4 {
    fn default() -> Self {
        open_claim4::Null(String::new())
    }
}

impl Serialize for open_claim4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            open_claim4::Null(file) => {
                CLAIM_NULL.serialize(dest)?;
                file.serialize(dest)
            }
            open_claim4::Previous(delegate_type) => {
                CLAIM_PREVIOUS.serialize(dest)?;
                delegate_type.serialize(dest)
            }
            open_claim4::DelegateCur(info) => {
                CLAIM_DELEGATE_CUR.serialize(dest)?;
                info.serialize(dest)
            }
            open_claim4::DelegatePrev(file) => {
                CLAIM_DELEGATE_PREV.serialize(dest)?;
                file.serialize(dest)
            }
            open_claim4::Fh => CLAIM_FH.serialize(dest),
            open_claim4::DelegCurFh(stateid) => {
                CLAIM_DELEG_CUR_FH.serialize(dest)?;
                stateid.serialize(dest)
            }
            open_claim4::DelegPrevFh => CLAIM_DELEG_PREV_FH.serialize(dest),
        }
    }
}

impl Deserialize for open_claim4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match union_discriminant(src, 7)? {
            CLAIM_NULL => open_claim4::Null(deserialize(src)?),
            CLAIM_PREVIOUS => open_claim4::Previous(deserialize(src)?),
            CLAIM_DELEGATE_CUR => open_claim4::DelegateCur(deserialize(src)?),
            CLAIM_DELEGATE_PREV => open_claim4::DelegatePrev(deserialize(src)?),
            CLAIM_FH => open_claim4::Fh,
            CLAIM_DELEG_CUR_FH => open_claim4::DelegCurFh(deserialize(src)?),
            _ => open_claim4::DelegPrevFh,
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN4args {
    pub seqid: u32,
    pub share_access: u32,
    pub share_deny: u32,
    pub owner: open_owner4,
    pub openhow: openflag4,
    pub claim: open_claim4,
}
SerializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);
DeserializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);

/// Delegation granted by OPEN. This server never delegates, so only the
/// `None` arm exists; decoding anything else is a protocol error here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum open_delegation4 {
    #[default]
    None,
}

impl Serialize for open_delegation4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        super::OPEN_DELEGATE_NONE.serialize(dest)
    }
}

impl Deserialize for open_delegation4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            super::OPEN_DELEGATE_NONE => {
                *self = open_delegation4::None;
                Ok(())
            }
            d => Err(invalid_data(format!("unsupported delegation type {d}"))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN4resok {
    pub stateid: stateid4,
    pub cinfo: change_info4,
    pub rflags: u32,
    pub attrset: Vec<u32>,
    pub delegation: open_delegation4,
}
SerializeStruct!(OPEN4resok, stateid, cinfo, rflags, attrset, delegation);
DeserializeStruct!(OPEN4resok, stateid, cinfo, rflags, attrset, delegation);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN_DOWNGRADE4args {
    pub open_stateid: stateid4,
    pub seqid: u32,
    pub share_access: u32,
    pub share_deny: u32,
}
SerializeStruct!(OPEN_DOWNGRADE4args, open_stateid, seqid, share_access, share_deny);
DeserializeStruct!(OPEN_DOWNGRADE4args, open_stateid, seqid, share_access, share_deny);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CLOSE4args {
    pub seqid: u32,
    pub open_stateid: stateid4,
}
SerializeStruct!(CLOSE4args, seqid, open_stateid);
DeserializeStruct!(CLOSE4args, seqid, open_stateid);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETATTR4args {
    pub stateid: stateid4,
    pub obj_attributes: fattr4,
}
SerializeStruct!(SETATTR4args, stateid, obj_attributes);
DeserializeStruct!(SETATTR4args, stateid, obj_attributes);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct REMOVE4args {
    pub target: String,
}
SerializeStruct!(REMOVE4args, target);
DeserializeStruct!(REMOVE4args, target);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct REMOVE4resok {
    pub cinfo: change_info4,
}
SerializeStruct!(REMOVE4resok, cinfo);
DeserializeStruct!(REMOVE4resok, cinfo);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct COMMIT4args {
    pub offset: u64,
    pub count: u32,
}
SerializeStruct!(COMMIT4args, offset, count);
DeserializeStruct!(COMMIT4args, offset, count);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct COMMIT4resok {
    pub writeverf: u64,
}
SerializeStruct!(COMMIT4resok, writeverf);
DeserializeStruct!(COMMIT4resok, writeverf);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WRITE4args {
    pub stateid: stateid4,
    pub offset: u64,
    /// Requested stability (`UNSTABLE4` | `DATA_SYNC4` | `FILE_SYNC4`).
    pub stable: u32,
    pub data: Vec<u8>,
}
SerializeStruct!(WRITE4args, stateid, offset, stable, data);
DeserializeStruct!(WRITE4args, stateid, offset, stable, data);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WRITE4resok {
    pub count: u32,
    pub committed: u32,
    pub writeverf: u64,
}
SerializeStruct!(WRITE4resok, count, committed, writeverf);
DeserializeStruct!(WRITE4resok, count, committed, writeverf);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READ4args {
    pub stateid: stateid4,
    pub offset: u64,
    pub count: u32,
}
SerializeStruct!(READ4args, stateid, offset, count);
DeserializeStruct!(READ4args, stateid, offset, count);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READ4resok {
    pub eof: bool,
    pub data: Vec<u8>,
}
SerializeStruct!(READ4resok, eof, data);
DeserializeStruct!(READ4resok, eof, data);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENAME4args {
    pub oldname: String,
    pub newname: String,
}
SerializeStruct!(RENAME4args, oldname, newname);
DeserializeStruct!(RENAME4args, oldname, newname);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENAME4resok {
    pub source_cinfo: change_info4,
    pub target_cinfo: change_info4,
}
SerializeStruct!(RENAME4resok, source_cinfo, target_cinfo);
DeserializeStruct!(RENAME4resok, source_cinfo, target_cinfo);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LINK4args {
    pub newname: String,
}
SerializeStruct!(LINK4args, newname);
DeserializeStruct!(LINK4args, newname);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LINK4resok {
    pub cinfo: change_info4,
}
SerializeStruct!(LINK4resok, cinfo);
DeserializeStruct!(LINK4resok, cinfo);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READLINK4resok {
    pub link: String,
}
SerializeStruct!(READLINK4resok, link);
DeserializeStruct!(READLINK4resok, link);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETXATTR4args {
    pub name: String,
}
SerializeStruct!(GETXATTR4args, name);
DeserializeStruct!(GETXATTR4args, name);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETXATTR4resok {
    pub value: Vec<u8>,
}
SerializeStruct!(GETXATTR4resok, value);
DeserializeStruct!(GETXATTR4resok, value);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETXATTR4args {
    /// `SETXATTR4_EITHER` | `SETXATTR4_CREATE` | `SETXATTR4_REPLACE`.
    pub option: u32,
    pub name: String,
    pub value: Vec<u8>,
}
SerializeStruct!(SETXATTR4args, option, name, value);
DeserializeStruct!(SETXATTR4args, option, name, value);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETXATTR4resok {
    pub cinfo: change_info4,
}
SerializeStruct!(SETXATTR4resok, cinfo);
DeserializeStruct!(SETXATTR4resok, cinfo);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LISTXATTRS4args {
    pub cookie: u64,
    pub maxcount: u32,
}
SerializeStruct!(LISTXATTRS4args, cookie, maxcount);
DeserializeStruct!(LISTXATTRS4args, cookie, maxcount);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LISTXATTRS4resok {
    pub cookie: u64,
    pub names: Vec<String>,
    pub eof: bool,
}
SerializeStruct!(LISTXATTRS4resok, cookie, names, eof);
DeserializeStruct!(LISTXATTRS4resok, cookie, names, eof);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct REMOVEXATTR4args {
    pub name: String,
}
SerializeStruct!(REMOVEXATTR4args, name);
DeserializeStruct!(REMOVEXATTR4args, name);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct REMOVEXATTR4resok {
    pub cinfo: change_info4,
}
SerializeStruct!(REMOVEXATTR4resok, cinfo);
DeserializeStruct!(REMOVEXATTR4resok, cinfo);

/// How SETATTR sets the modification time: the server's clock, or an
/// explicit client timestamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum settime4 {
    #[default]
    ServerTime,
    ClientTime(nfstime4),
}

impl Serialize for settime4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            settime4::ServerTime => false.serialize(dest),
            settime4::ClientTime(time) => {
                true.serialize(dest)?;
                time.serialize(dest)
            }
        }
    }
}

impl Deserialize for settime4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = if deserialize::<bool>(src)? {
            settime4::ClientTime(deserialize(src)?)
        } else {
            settime4::ServerTime
        };
        Ok(())
    }
}
