//! Pooled growable byte buffers with independent read and write cursors.
//!
//! Every request and reply travels through one of these: the connection
//! loop fills one from the socket, the COMPOUND runtime decodes from the
//! read cursor and encodes into the write cursor, and the reply cache keeps
//! whole encoded replies by copying buffer to buffer. `seek_write` lets the
//! runtime rewrite the COMPOUND header in place once the executed operation
//! count and final status are known.
//!
//! Buffers are explicitly released back to their pool with [`Buf::discard`];
//! release resets both cursors but keeps the allocation.

use std::io::{Read, Write};
use std::sync::{Mutex, OnceLock};

use tracing::trace;

/// Initial capacity handed to buffers minted by an empty pool.
const INITIAL_CAPACITY: usize = 1024;

/// A mutex-protected free list of [`Buf`]s.
#[derive(Default)]
pub struct Pool {
    bufs: Mutex<Vec<Buf>>,
}

impl Pool {
    /// Takes a buffer from the free list, or mints a fresh one.
    pub fn get(&self) -> Buf {
        if let Some(buf) = self.bufs.lock().expect("buffer pool poisoned").pop() {
            return buf;
        }
        trace!("creating new buffer");
        Buf::with_capacity(INITIAL_CAPACITY)
    }

    /// Resets a buffer and returns it to the free list.
    pub fn put(&self, mut buf: Buf) {
        buf.reset();
        self.bufs.lock().expect("buffer pool poisoned").push(buf);
    }
}

fn global() -> &'static Pool {
    static GLOBAL: OnceLock<Pool> = OnceLock::new();
    GLOBAL.get_or_init(Pool::default)
}

/// Takes a buffer from the process-wide pool.
pub fn get() -> Buf {
    global().get()
}

/// Returns a buffer to the process-wide pool.
pub fn put(buf: Buf) {
    global().put(buf)
}

/// A growable byte buffer with separate read and write positions.
#[derive(Debug, Default)]
pub struct Buf {
    buf: Vec<u8>,
    r: usize,
    w: usize,
}

impl Buf {
    pub fn with_capacity(capacity: usize) -> Self {
        Buf { buf: vec![0; capacity], r: 0, w: 0 }
    }

    /// The bytes written but not yet read.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.r..self.w]
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.w - self.r
    }

    pub fn is_empty(&self) -> bool {
        self.w == self.r
    }

    /// Reserves `n` contiguous bytes at the write cursor without committing
    /// them. The caller fills the slice and then calls [`Buf::commit`].
    pub fn allocate(&mut self, n: usize) -> &mut [u8] {
        if self.w + n > self.buf.len() {
            self.grow(self.w + n);
        }
        &mut self.buf[self.w..self.w + n]
    }

    /// Advances the write cursor over bytes filled via [`Buf::allocate`].
    pub fn commit(&mut self, n: usize) {
        self.w += n;
    }

    /// Moves the write cursor, returning the previous position. Seeking
    /// back to 0, rewriting, then seeking forward again is how the COMPOUND
    /// header gets patched.
    pub fn seek_write(&mut self, n: usize) -> usize {
        std::mem::replace(&mut self.w, n)
    }

    /// Appends this buffer's unread bytes to `target`.
    pub fn copy_to(&self, target: &mut Buf) {
        let src = &self.buf[self.r..self.w];
        let dst = target.allocate(src.len());
        dst.copy_from_slice(src);
        target.commit(src.len());
    }

    /// Rewinds both cursors; the allocation is kept.
    pub fn reset(&mut self) {
        self.r = 0;
        self.w = 0;
    }

    /// Returns the buffer to the process-wide pool.
    pub fn discard(self) {
        put(self);
    }

    fn grow(&mut self, n: usize) {
        if n > self.buf.len() {
            self.buf.resize(n, 0);
        }
    }
}

impl Write for Buf {
    fn write(&mut self, p: &[u8]) -> std::io::Result<usize> {
        if self.w + p.len() > self.buf.len() {
            self.grow(self.w + p.len());
        }
        self.buf[self.w..self.w + p.len()].copy_from_slice(p);
        self.w += p.len();
        Ok(p.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for Buf {
    fn read(&mut self, p: &mut [u8]) -> std::io::Result<usize> {
        let n = p.len().min(self.w - self.r);
        p[..n].copy_from_slice(&self.buf[self.r..self.r + n]);
        self.r += n;
        Ok(n)
    }
}
