//! Shared test support: an in-memory filesystem backend and a harness that
//! drives a server connection over an in-process duplex stream.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;

use nfs4_sable::auth::Creds;
use nfs4_sable::clients::Clients;
use nfs4_sable::conn::Conn;
use nfs4_sable::server::WorkerPool;
use nfs4_sable::vfs::{
    self, AdvancedLinkFs, FileInfo, FileIo, FsError, ListerAt, OpenFlags, ReaderAt, WriterAt,
    MODE_DIR, MODE_REGULAR, MODE_SYMLINK,
};
use nfs4_sable::worker::WorkerSource;
use nfs4_sable::xdr::nfs4;
use nfs4_sable::xdr::rpc::{opaque_auth, rpc_call, rpc_reply, AUTH_FLAVOR_UNIX, RPC_CALL};
use nfs4_sable::xdr::{deserialize, Deserialize, Serialize};

#[derive(Clone)]
struct Node {
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    mtime: SystemTime,
    data: Vec<u8>,
    xattrs: HashMap<String, Vec<u8>>,
    link_target: Option<String>,
}

impl Node {
    fn dir() -> Node {
        Node {
            mode: MODE_DIR | 0o755,
            uid: 1000,
            gid: 1000,
            nlink: 2,
            mtime: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000),
            data: Vec::new(),
            xattrs: HashMap::new(),
            link_target: None,
        }
    }

    fn file(data: &[u8]) -> Node {
        Node {
            mode: MODE_REGULAR | 0o644,
            nlink: 1,
            data: data.to_vec(),
            ..Node::dir()
        }
    }

    fn symlink(target: &str) -> Node {
        Node {
            mode: MODE_SYMLINK | 0o777,
            nlink: 1,
            link_target: Some(target.to_string()),
            ..Node::dir()
        }
    }

    fn is_dir(&self) -> bool {
        self.mode & vfs::MODE_TYPE_MASK == MODE_DIR
    }

    fn info(&self, name: &str) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size: self.data.len() as u64,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            nlink: self.nlink,
            mtime: self.mtime,
            extended: self.xattrs.clone(),
        }
    }
}

/// A cloneable in-memory filesystem keyed by absolute path.
#[derive(Clone)]
pub struct DemoFs {
    state: Arc<Mutex<HashMap<String, Node>>>,
}

impl Default for DemoFs {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::dir());
        DemoFs { state: Arc::new(Mutex::new(nodes)) }
    }
}

impl DemoFs {
    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.state.lock().unwrap().insert(path.to_string(), Node::file(data));
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.state.lock().unwrap().insert(path.to_string(), Node::dir());
        self
    }

    pub fn with_symlink(self, path: &str, target: &str) -> Self {
        self.state.lock().unwrap().insert(path.to_string(), Node::symlink(target));
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().unwrap().contains_key(path)
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().get(path).map(|n| n.data.clone())
    }

    fn base_name(path: &str) -> String {
        path.rsplit('/').next().unwrap_or(path).to_string()
    }
}

fn handle_for(path: &str) -> Vec<u8> {
    let mut handle = b"fh:".to_vec();
    handle.extend_from_slice(path.as_bytes());
    handle
}

#[async_trait]
impl AdvancedLinkFs for DemoFs {
    async fn handle(&self, path: &str) -> Result<Vec<u8>, FsError> {
        if !self.state.lock().unwrap().contains_key(path) {
            return Err(FsError::NotFound);
        }
        Ok(handle_for(path))
    }

    async fn path(&self, handle: &[u8]) -> Result<String, FsError> {
        let path = handle
            .strip_prefix(b"fh:")
            .and_then(|p| String::from_utf8(p.to_vec()).ok())
            .ok_or(FsError::NotFound)?;

        if !self.state.lock().unwrap().contains_key(&path) {
            return Err(FsError::NotFound);
        }

        Ok(path)
    }

    async fn lstat(&self, path: &str) -> Result<FileInfo, FsError> {
        let nodes = self.state.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        Ok(node.info(&DemoFs::base_name(path)))
    }

    async fn list(&self, path: &str) -> Result<Box<dyn ListerAt>, FsError> {
        let nodes = self.state.lock().unwrap();

        let dir = nodes.get(path).ok_or(FsError::NotFound)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }

        let mut entries: Vec<FileInfo> = nodes
            .iter()
            .filter(|(child, _)| {
                child.as_str() != path && vfs::parent(child) == path
            })
            .map(|(child, node)| node.info(&DemoFs::base_name(child)))
            .collect();

        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Box::new(DemoLister { entries }))
    }

    async fn file_read(&self, path: &str) -> Result<Box<dyn ReaderAt>, FsError> {
        let nodes = self.state.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        if node.is_dir() {
            return Err(FsError::IsDirectory);
        }
        Ok(Box::new(DemoFile { state: Arc::clone(&self.state), path: path.to_string() }))
    }

    async fn file_write(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn WriterAt>, FsError> {
        self.prepare_open(path, flags)?;
        Ok(Box::new(DemoFile { state: Arc::clone(&self.state), path: path.to_string() }))
    }

    async fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        _mode: u32,
    ) -> Result<Box<dyn FileIo>, FsError> {
        self.prepare_open(path, flags)?;
        Ok(Box::new(DemoFile { state: Arc::clone(&self.state), path: path.to_string() }))
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(FsError::Exists);
        }
        let mut node = Node::dir();
        node.mode = MODE_DIR | (mode & 0o777);
        nodes.insert(path.to_string(), node);
        Ok(())
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(FsError::Exists);
        }
        nodes.insert(path.to_string(), Node::symlink(target));
        Ok(())
    }

    async fn readlink(&self, path: &str) -> Result<String, FsError> {
        let nodes = self.state.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        node.link_target.clone().ok_or(FsError::Invalid)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.remove(from).ok_or(FsError::NotFound)?;
        nodes.insert(to.to_string(), node);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        if node.is_dir() {
            return Err(FsError::IsDirectory);
        }
        nodes.remove(path);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get(path).ok_or(FsError::NotFound)?;
        if !node.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if nodes.keys().any(|child| child != path && vfs::parent(child) == path) {
            return Err(FsError::Invalid);
        }
        nodes.remove(path);
        Ok(())
    }

    async fn link(&self, from: &str, to: &str) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let mut node = nodes.get(from).ok_or(FsError::NotFound)?.clone();
        node.nlink += 1;
        nodes.insert(to.to_string(), node);
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.mode = (node.mode & vfs::MODE_TYPE_MASK) | (mode & 0o777);
        Ok(())
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }

    async fn chtimes(
        &self,
        path: &str,
        _atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.mtime = mtime;
        Ok(())
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.data.resize(size as usize, 0);
        Ok(())
    }

    async fn set_extended_attr(
        &self,
        path: &str,
        name: &str,
        value: &[u8],
    ) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.xattrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    async fn unset_extended_attr(&self, path: &str, name: &str) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.xattrs.remove(name);
        Ok(())
    }

    async fn close(&self) -> Result<(), FsError> {
        Ok(())
    }
}

impl DemoFs {
    fn prepare_open(&self, path: &str, flags: OpenFlags) -> Result<(), FsError> {
        let mut nodes = self.state.lock().unwrap();

        match nodes.get_mut(path) {
            Some(node) if node.is_dir() => Err(FsError::IsDirectory),
            Some(node) => {
                if flags.create && flags.exclusive {
                    return Err(FsError::Exists);
                }
                if flags.truncate {
                    node.data.clear();
                }
                Ok(())
            }
            None if flags.create => {
                nodes.insert(path.to_string(), Node::file(b""));
                Ok(())
            }
            None => Err(FsError::NotFound),
        }
    }
}

struct DemoLister {
    entries: Vec<FileInfo>,
}

#[async_trait]
impl ListerAt for DemoLister {
    async fn list_at(&self, offset: u64, max: usize) -> Result<(Vec<FileInfo>, bool), FsError> {
        let start = (offset as usize).min(self.entries.len());
        let end = (start + max).min(self.entries.len());
        Ok((self.entries[start..end].to_vec(), end == self.entries.len()))
    }

    async fn close(&self) -> Result<(), FsError> {
        Ok(())
    }
}

struct DemoFile {
    state: Arc<Mutex<HashMap<String, Node>>>,
    path: String,
}

#[async_trait]
impl FileIo for DemoFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(usize, bool), FsError> {
        ReaderAt::read_at(self, buf, offset).await
    }

    async fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        WriterAt::write_at(self, data, offset).await
    }

    async fn close(&self) -> Result<(), FsError> {
        Ok(())
    }
}

#[async_trait]
impl ReaderAt for DemoFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(usize, bool), FsError> {
        let nodes = self.state.lock().unwrap();
        let node = nodes.get(&self.path).ok_or(FsError::NotFound)?;

        let start = (offset as usize).min(node.data.len());
        let n = buf.len().min(node.data.len() - start);
        buf[..n].copy_from_slice(&node.data[start..start + n]);

        Ok((n, start + n == node.data.len()))
    }

    async fn close(&self) -> Result<(), FsError> {
        Ok(())
    }
}

#[async_trait]
impl WriterAt for DemoFile {
    async fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let mut nodes = self.state.lock().unwrap();
        let node = nodes.get_mut(&self.path).ok_or(FsError::NotFound)?;

        let end = offset as usize + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset as usize..end].copy_from_slice(data);

        Ok(data.len())
    }

    async fn close(&self) -> Result<(), FsError> {
        Ok(())
    }
}

/// A connection to an in-process server running over a duplex stream.
pub struct TestConn {
    stream: DuplexStream,
    next_xid: u32,
    _shutdown: watch::Sender<bool>,
}

/// Starts a linear-mode server around `fs` and connects to it.
pub async fn connect(fs: DemoFs) -> TestConn {
    let (client, server) = tokio::io::duplex(1 << 20);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let clients = Clients::new();
    clients.spawn_sweeper(shutdown_rx.clone());

    let loader = move |_creds: Creds| {
        let fs = fs.clone();
        async move { Ok::<Box<dyn AdvancedLinkFs>, anyhow::Error>(Box::new(fs)) }
    };

    let pool = WorkerPool::new(Arc::new(loader), Arc::clone(&clients), shutdown_rx.clone());

    let conn = Conn {
        stream: server,
        clients,
        workers: pool as Arc<dyn WorkerSource>,
        remote: "127.0.0.1:665".to_string(),
    };

    tokio::spawn(async move {
        let _ = conn.serve_linear(shutdown_rx).await;
    });

    TestConn { stream: client, next_xid: 1, _shutdown: shutdown_tx }
}

/// The AUTH_UNIX credentials every test call carries.
pub fn test_creds_body() -> Vec<u8> {
    let mut body = Vec::new();
    77_u32.serialize(&mut body).unwrap(); // stamp
    "testhost".serialize(&mut body).unwrap();
    1000_u32.serialize(&mut body).unwrap(); // uid
    1000_u32.serialize(&mut body).unwrap(); // gid
    vec![1000_u32, 20].serialize(&mut body).unwrap();
    body
}

pub fn unix_auth() -> opaque_auth {
    opaque_auth { flavor: AUTH_FLAVOR_UNIX, body: test_creds_body() }
}

impl TestConn {
    /// Writes raw bytes to the server without framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// True when the server has hung up.
    pub async fn read_eof(&mut self) -> bool {
        let mut byte = [0_u8; 1];
        matches!(self.stream.read(&mut byte).await, Ok(0))
    }

    /// Sends a raw framed record.
    pub async fn send_record(&mut self, record: &[u8]) {
        let header = (record.len() as u32 | 1 << 31).to_be_bytes();
        self.stream.write_all(&header).await.unwrap();
        self.stream.write_all(record).await.unwrap();
    }

    /// Reads one framed record.
    pub async fn recv_record(&mut self) -> Vec<u8> {
        let mut header = [0_u8; 4];
        self.stream.read_exact(&mut header).await.unwrap();
        let len = (u32::from_be_bytes(header) & !(1 << 31)) as usize;
        let mut record = vec![0; len];
        self.stream.read_exact(&mut record).await.unwrap();
        record
    }

    /// Issues one call and returns the decoded reply envelope plus the
    /// remaining payload bytes.
    pub async fn call(&mut self, call: &rpc_call, body: &[u8]) -> (rpc_reply, Vec<u8>) {
        let mut record = Vec::new();
        call.serialize(&mut record).unwrap();
        record.extend_from_slice(body);

        self.send_record(&record).await;

        let reply_record = self.recv_record().await;
        let src = &mut reply_record.as_slice();
        let reply = deserialize::<rpc_reply>(src).unwrap();

        (reply, src.to_vec())
    }

    /// Issues a COMPOUND with the given minor version and operations.
    pub async fn compound(&mut self, minor: u32, ops: &[Vec<u8>]) -> (rpc_reply, Vec<u8>) {
        let mut body = Vec::new();
        "t".serialize(&mut body).unwrap();
        minor.serialize(&mut body).unwrap();
        (ops.len() as u32).serialize(&mut body).unwrap();
        for op in ops {
            body.extend_from_slice(op);
        }

        let call = self.next_call(nfs4::PROC4_COMPOUND);
        self.call(&call, &body).await
    }

    pub fn next_call(&mut self, proc: u32) -> rpc_call {
        let xid = self.next_xid;
        self.next_xid += 1;

        rpc_call {
            xid,
            msg_type: RPC_CALL,
            rpcvers: 2,
            prog: nfs4::PROGRAM,
            vers: nfs4::VERSION,
            proc,
            cred: unix_auth(),
            verf: opaque_auth::default(),
        }
    }
}

/// An operation body: opcode followed by serialized arguments.
pub fn op(opcode: u32, args: &[&dyn SerializeArg]) -> Vec<u8> {
    let mut body = Vec::new();
    opcode.serialize(&mut body).unwrap();
    for arg in args {
        arg.put(&mut body);
    }
    body
}

/// Object-safe serialization helper for building operation bodies.
pub trait SerializeArg {
    fn put(&self, out: &mut Vec<u8>);
}

impl<T: Serialize> SerializeArg for T {
    fn put(&self, out: &mut Vec<u8>) {
        self.serialize(out).unwrap();
    }
}

/// The parsed prefix of a COMPOUND reply.
pub struct CompoundReply {
    pub verf: opaque_auth,
    pub accept_stat: u32,
    pub status: u32,
    pub tag: String,
    pub ops_count: u32,
    pub results: Vec<u8>,
}

/// Splits a COMPOUND reply payload into header fields and result bytes.
pub fn parse_compound(payload: &[u8]) -> CompoundReply {
    let src = &mut &payload[..];

    let verf = deserialize::<opaque_auth>(src).unwrap();
    let accept_stat = deserialize::<u32>(src).unwrap();
    let status = deserialize::<u32>(src).unwrap();
    let tag = deserialize::<String>(src).unwrap();
    let ops_count = deserialize::<u32>(src).unwrap();

    CompoundReply { verf, accept_stat, status, tag, ops_count, results: src.to_vec() }
}

/// Reads the (opcode, status) prefix of the next result.
pub fn read_op_header(src: &mut &[u8]) -> (u32, u32) {
    let opcode = deserialize::<u32>(src).unwrap();
    let status = deserialize::<u32>(src).unwrap();
    (opcode, status)
}

/// Deserializes a result body.
pub fn read_res<T: Deserialize + Default>(src: &mut &[u8]) -> T {
    deserialize::<T>(src).unwrap()
}
