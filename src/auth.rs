//! AUTH_UNIX credential handling.
//!
//! The server accepts exactly one authentication flavor: `AUTH_UNIX`
//! (uid/gid/groups). Weaker flavors are rejected with `AUTH_TOOWEAK` as a
//! denied RPC reply; anything else that fails to decode aborts the
//! connection. Credentials gate client-id ownership and select the worker
//! serving a request, so equality is defined carefully: two credential
//! tuples are the same caller when they share the uid and the same set of
//! groups, where the primary gid and the auxiliary list are folded into one
//! set regardless of order or duplication.

use std::io::Read;

use crate::protocol::xdr::rpc::{opaque_auth, AUTH_BADCRED, AUTH_FLAVOR_UNIX, AUTH_TOOWEAK};
use crate::protocol::xdr::{deserialize, Deserialize};

/// Authentication failure carrying the `AUTH_*` status for the denied
/// reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError {
    pub code: u32,
}

/// Decoded AUTH_UNIX credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Creds {
    /// The stamp field; clients use it as an arbitrary token.
    pub stamp: u32,
    pub hostname: String,
    pub uid: u32,
    pub gid: u32,
    pub additional_groups: Vec<u32>,
}

/// Validates the credential and verifier fields of a call and decodes the
/// AUTH_UNIX body. Returns the verifier to echo in the accepted reply
/// together with the caller's credentials.
pub fn authenticate(cred: &opaque_auth, _verf: &opaque_auth) -> Result<(opaque_auth, Creds), AuthError> {
    if cred.flavor < AUTH_FLAVOR_UNIX {
        return Err(AuthError { code: AUTH_TOOWEAK });
    }

    let mut body = cred.body.as_slice();
    let creds = deserialize::<Creds>(&mut body).map_err(|_| AuthError { code: AUTH_BADCRED })?;

    Ok((opaque_auth { flavor: AUTH_FLAVOR_UNIX, body: Vec::new() }, creds))
}

/// Hand-written decoder; credentials ride on every call, so this stays off
/// the generic struct path.
impl Deserialize for Creds {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.stamp.deserialize(src)?;
        self.hostname.deserialize(src)?;
        self.uid.deserialize(src)?;
        self.gid.deserialize(src)?;
        self.additional_groups.deserialize(src)?;
        Ok(())
    }
}

impl Creds {
    /// Same caller: identical uid and identical group set. The gid and the
    /// auxiliary groups are one set, compared modulo order and duplicates.
    pub fn equal(&self, other: &Creds) -> bool {
        if self.uid != other.uid {
            return false;
        }

        if self.gid == other.gid && self.additional_groups == other.additional_groups {
            return true;
        }

        let mut mine: Vec<u32> = Vec::with_capacity(self.additional_groups.len() + 1);
        mine.push(self.gid);
        mine.extend_from_slice(&self.additional_groups);
        mine.sort_unstable();
        mine.dedup();

        let mut theirs: Vec<u32> = Vec::with_capacity(other.additional_groups.len() + 1);
        theirs.push(other.gid);
        theirs.extend_from_slice(&other.additional_groups);
        theirs.sort_unstable();
        theirs.dedup();

        mine == theirs
    }
}

impl std::fmt::Display for Creds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "host: {}, uid: {}, gid: {}, groups: {:?}",
            self.hostname, self.uid, self.gid, self.additional_groups
        )
    }
}
