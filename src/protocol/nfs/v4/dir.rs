//! Directory operations: READDIR, CREATE, REMOVE, RENAME, LINK, READLINK.
//!
//! READDIR is a lazy cursor. The first call opens a backend lister and
//! registers it in the worker under a random cookie verifier; follow-up
//! calls present the verifier plus their last cookie to resume. Entries are
//! read in batches of 128 and emitted until one of the client's two byte
//! budgets runs out: `dircount` limits names and cookies, `maxcount` the
//! whole encoded result. When the backend reports end of directory the
//! lister is closed and the sentinel verifier `u64::MAX` tells both sides
//! the enumeration is over.

use std::sync::Arc;

use anyhow::Error;
use tracing::{trace, warn};

use super::{discard_on_fault, encode_attrs, Bitmap, Compound, FileHandle};
use crate::bufpool::Buf;
use crate::protocol::xdr::nfs4::{
    self, createtype4, change_info4, dirlist4, entry4, nfsstat4, CREATE4args, CREATE4resok,
    LINK4args, LINK4resok, READDIR4args, READDIR4resok, READLINK4resok, REMOVE4args,
    REMOVE4resok, RENAME4args, RENAME4resok,
};
use crate::protocol::xdr::{deserialize, pad, Serialize};
use crate::vfs::{self, ListerAt, MODE_DIR};
use crate::worker::{Entry, EOF_LISTER};

/// Entries fetched from the backend per READDIR call.
const READDIR_BATCH: usize = 128;

/// Cookie bias: entry cookies are `offset + COOKIE_OFFSET + index + 1`, so
/// the values a client replays never collide with the reserved cookies
/// 0..=2.
const COOKIE_OFFSET: u64 = 1000;

impl Compound<'_> {
    pub(super) async fn readdir(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let mut args = deserialize::<READDIR4args>(input)?;
        let requested = Bitmap::from_words(&args.attr_request);

        trace!("READDIR {} {} {}", args.cookie, args.cookieverf, requested);

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_READDIR, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let lister: Arc<dyn ListerAt> = if args.cookie == 0 {
            match fs.fs().list(&current.path).await {
                Ok(opened) => {
                    let lister: Arc<dyn ListerAt> = Arc::from(opened);
                    args.cookieverf = fs.add_lister(Arc::clone(&lister));
                    lister
                }
                Err(err) => {
                    discard_on_fault(fs.shared(), &err);
                    return self.op_status(out, nfs4::OP4_READDIR, err.status());
                }
            }
        } else if args.cookieverf == EOF_LISTER {
            let status = self.op_status(out, nfs4::OP4_READDIR, nfsstat4::NFS4_OK)?;
            READDIR4resok {
                cookieverf: args.cookieverf,
                reply: dirlist4 { entries: None, eof: true },
            }
            .serialize(out)?;
            return Ok(status);
        } else {
            match fs.get_lister(args.cookieverf) {
                Some(lister) => lister,
                None => return self.op_status(out, nfs4::OP4_READDIR, nfsstat4::NFS4ERR_NOT_SAME),
            }
        };

        let offset = args.cookie.saturating_sub(COOKIE_OFFSET);

        let (infos, mut eof) = match lister.list_at(offset, READDIR_BATCH).await {
            Ok(batch) => batch,
            Err(err) => {
                fs.shared().discard();
                return self.op_status(out, nfs4::OP4_READDIR, err.status());
            }
        };

        let mut entries: Vec<entry4> = Vec::new();
        let mut dircount = args.dircount;
        let mut maxcount = args.maxcount;

        for (i, info) in infos.iter().enumerate() {
            let child = vfs::join(&current.path, &info.name);

            let (handle, handle_status) = match fs.fs().handle(&child).await {
                Ok(handle) => {
                    fs.cache.put(
                        &handle,
                        Entry { path: child.clone(), info: info.clone() },
                    );
                    (handle, nfsstat4::NFS4_OK)
                }
                Err(err) => {
                    warn!("failed to get handle for {child}: {err}");
                    (Vec::new(), err.status())
                }
            };

            // The cookie names the offset of the next entry.
            let cookie = offset + COOKIE_OFFSET + i as u64 + 1;

            let attrs = encode_attrs(
                &handle,
                info,
                handle_status,
                &requested,
                &self.creds,
                fs.session_verifier,
            );

            let name_cookie_size = (8 + 4 + info.name.len() + pad(info.name.len())) as u32;
            let attrs_size = (4 + 4 * attrs.attrmask.len()
                + 4
                + attrs.attr_vals.len()
                + pad(attrs.attr_vals.len())) as u32;

            entries.push(entry4 {
                cookie,
                name: info.name.clone(),
                attrs,
                nextentry: None,
            });

            if dircount < name_cookie_size {
                eof = false;
                break;
            }
            dircount -= name_cookie_size;

            let full_size = name_cookie_size + attrs_size + 4;
            if maxcount < full_size + 128 {
                eof = false;
                break;
            }
            maxcount -= full_size;
        }

        if eof {
            if let Err(err) = fs.close_lister(args.cookieverf).await {
                return self.op_status(out, nfs4::OP4_READDIR, err.status());
            }
            args.cookieverf = EOF_LISTER;
        }

        let mut head: Option<Box<entry4>> = None;
        for entry in entries.into_iter().rev() {
            head = Some(Box::new(entry4 { nextentry: head, ..entry }));
        }

        let status = self.op_status(out, nfs4::OP4_READDIR, nfsstat4::NFS4_OK)?;
        READDIR4resok {
            cookieverf: args.cookieverf,
            reply: dirlist4 { entries: head, eof },
        }
        .serialize(out)?;

        Ok(status)
    }

    pub(super) async fn create(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<CREATE4args>(input)?;

        trace!("CREATE {} type {}", args.objname, args.objtype.obj_type());

        if args.objname.is_empty() {
            return self.op_status(out, nfs4::OP4_CREATE, nfsstat4::NFS4ERR_INVAL);
        }

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_CREATE, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let path = vfs::join(&current.path, &args.objname);

        let attrs = match super::decode_attrs(&args.createattrs) {
            Ok(attrs) => attrs,
            Err(_) => return self.op_status(out, nfs4::OP4_CREATE, nfsstat4::NFS4ERR_BADXDR),
        };

        let fs = self.fs().await;

        let result = match &args.objtype {
            createtype4::Directory => {
                let mode = attrs.mode.unwrap_or(0o755) | MODE_DIR;
                fs.fs().mkdir(&path, mode).await
            }
            // Regular files are created through OPEN, never CREATE.
            createtype4::Regular => {
                return self.op_status(out, nfs4::OP4_CREATE, nfsstat4::NFS4ERR_OP_ILLEGAL);
            }
            createtype4::Symlink(target) => fs.fs().symlink(target, &path).await,
            createtype4::BlockDevice(_)
            | createtype4::CharDevice(_)
            | createtype4::Fifo
            | createtype4::Socket => {
                return self.op_status(out, nfs4::OP4_CREATE, nfsstat4::NFS4ERR_NOTSUPP);
            }
            createtype4::Unspecified => {
                return self.op_status(out, nfs4::OP4_CREATE, nfsstat4::NFS4ERR_BADTYPE);
            }
        };

        if let Err(err) = result {
            discard_on_fault(fs.shared(), &err);
            return self.op_status(out, nfs4::OP4_CREATE, err.status());
        }

        fs.cache.invalidate(&current.handle);

        let handle = match fs.fs().handle(&path).await {
            Ok(handle) => handle,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_CREATE, err.status());
            }
        };

        self.current_handle = Some(FileHandle { handle, path });

        let status = self.op_status(out, nfs4::OP4_CREATE, nfsstat4::NFS4_OK)?;
        CREATE4resok {
            cinfo: change_info4::default(),
            attrset: Bitmap::from_ids([super::attrs::A_MODE]).words(),
        }
        .serialize(out)?;

        Ok(status)
    }

    pub(super) async fn remove(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<REMOVE4args>(input)?;

        trace!("REMOVE {}", args.target);

        if args.target.is_empty() {
            return self.op_status(out, nfs4::OP4_REMOVE, nfsstat4::NFS4ERR_INVAL);
        }

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_REMOVE, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let path = vfs::join(&current.path, &args.target);

        let fs = self.fs().await;

        let mut result = fs.fs().remove(&path).await;

        if result.is_err() && fs.fs().rmdir(&path).await.is_ok() {
            result = Ok(());
        }

        if let Err(err) = result {
            discard_on_fault(fs.shared(), &err);
            return self.op_status(out, nfs4::OP4_REMOVE, err.status());
        }

        fs.cache.invalidate(&current.handle);

        let status = self.op_status(out, nfs4::OP4_REMOVE, nfsstat4::NFS4_OK)?;
        REMOVE4resok { cinfo: change_info4::default() }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn rename(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<RENAME4args>(input)?;

        trace!("RENAME {} {}", args.oldname, args.newname);

        if args.oldname.is_empty() || args.newname.is_empty() {
            return self.op_status(out, nfs4::OP4_RENAME, nfsstat4::NFS4ERR_INVAL);
        }

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_RENAME, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let Some(saved) = self.saved_handle.clone() else {
            return self.op_status(out, nfs4::OP4_RENAME, nfsstat4::NFS4ERR_RESTOREFH);
        };

        let from = vfs::join(&saved.path, &args.oldname);
        let to = vfs::join(&current.path, &args.newname);

        let fs = self.fs().await;

        if let Err(err) = fs.fs().rename(&from, &to).await {
            discard_on_fault(fs.shared(), &err);

            // A backend refusing the move is a cross-device rename from the
            // client's point of view.
            let status = match err.status() {
                nfsstat4::NFS4ERR_NOTSUPP => nfsstat4::NFS4ERR_XDEV,
                status => status,
            };

            return self.op_status(out, nfs4::OP4_RENAME, status);
        }

        fs.cache.invalidate(&saved.handle);
        fs.cache.invalidate(&current.handle);

        let status = self.op_status(out, nfs4::OP4_RENAME, nfsstat4::NFS4_OK)?;
        RENAME4resok {
            source_cinfo: change_info4::default(),
            target_cinfo: change_info4::default(),
        }
        .serialize(out)?;

        Ok(status)
    }

    pub(super) async fn link(&mut self, input: &mut Buf, out: &mut Buf) -> Result<nfsstat4, Error> {
        let args = deserialize::<LINK4args>(input)?;

        trace!("LINK {}", args.newname);

        if args.newname.is_empty() {
            return self.op_status(out, nfs4::OP4_LINK, nfsstat4::NFS4ERR_INVAL);
        }

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_LINK, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let Some(saved) = self.saved_handle.clone() else {
            return self.op_status(out, nfs4::OP4_LINK, nfsstat4::NFS4ERR_RESTOREFH);
        };

        let to = vfs::join(&current.path, &args.newname);

        let fs = self.fs().await;

        if let Err(err) = fs.fs().link(&saved.path, &to).await {
            discard_on_fault(fs.shared(), &err);

            let status = match err.status() {
                nfsstat4::NFS4ERR_NOTSUPP => nfsstat4::NFS4ERR_XDEV,
                status => status,
            };

            return self.op_status(out, nfs4::OP4_LINK, status);
        }

        fs.cache.invalidate(&current.handle);

        let status = self.op_status(out, nfs4::OP4_LINK, nfsstat4::NFS4_OK)?;
        LINK4resok { cinfo: change_info4::default() }.serialize(out)?;

        Ok(status)
    }

    pub(super) async fn readlink(&mut self, out: &mut Buf) -> Result<nfsstat4, Error> {
        trace!("READLINK");

        let Some(current) = self.current_handle.clone() else {
            return self.op_status(out, nfs4::OP4_READLINK, nfsstat4::NFS4ERR_NOFILEHANDLE);
        };

        let fs = self.fs().await;

        let target = match fs.fs().readlink(&current.path).await {
            Ok(target) => target,
            Err(err) => {
                discard_on_fault(fs.shared(), &err);
                return self.op_status(out, nfs4::OP4_READLINK, err.status());
            }
        };

        let status = self.op_status(out, nfs4::OP4_READLINK, nfsstat4::NFS4_OK)?;
        READLINK4resok { link: target }.serialize(out)?;

        Ok(status)
    }
}
