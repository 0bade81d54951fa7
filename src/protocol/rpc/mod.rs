//! RPC record marking over TCP, as specified in RFC 5531 (previously
//! RFC 1831 section 10).
//!
//! Each RPC message on a TCP stream is preceded by a 4-byte big-endian
//! fragment header: the high bit flags the last fragment of a record, the
//! low 31 bits carry the fragment length. This server requires every call
//! to arrive as a single last fragment — multi-fragment records are
//! refused, which keeps one framed call equal to one pooled buffer.
//!
//! [`receive_call`] frames one call off the stream into a pooled buffer and
//! decodes its typed prefix; the procedure arguments stay in the buffer for
//! the COMPOUND runtime. [`send_reply`] frames a finished reply back onto
//! the stream: fragment header, the three-word reply envelope, then the
//! payload buffer.

use anyhow::{anyhow, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::bufpool::{self, Buf};
use crate::protocol::xdr::rpc::{rpc_call, rpc_reply, RPC_CALL};
use crate::protocol::xdr::{deserialize, Serialize};

/// Upper bound on a single RPC record; larger records abort the connection.
pub const MAX_RPC_RECORD_LENGTH: usize = 8 * 1024 * 1024;

/// The high bit of a fragment header marks the final fragment.
const LAST_FRAGMENT: u32 = 1 << 31;

/// Reads one framed call from the stream. Returns the decoded call prefix
/// and a pooled buffer positioned at the procedure arguments.
pub async fn receive_call<R>(r: &mut R) -> Result<(rpc_call, Buf), anyhow::Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0_u8; 4];
    r.read_exact(&mut header).await?;

    let fragment = u32::from_be_bytes(header);

    if fragment & LAST_FRAGMENT == 0 {
        bail!("fragmented RPC records are not supported");
    }

    let length = (fragment & !LAST_FRAGMENT) as usize;

    if length > MAX_RPC_RECORD_LENGTH {
        bail!("RPC record length {length} exceeds max {MAX_RPC_RECORD_LENGTH}");
    }

    trace!("reading record of {length} bytes");

    let mut buf = bufpool::get();
    r.read_exact(buf.allocate(length)).await?;
    buf.commit(length);

    let call = match deserialize::<rpc_call>(&mut buf) {
        Ok(call) => call,
        Err(err) => {
            buf.discard();
            return Err(anyhow!("bad RPC call header: {err}"));
        }
    };

    if call.msg_type != RPC_CALL {
        buf.discard();
        bail!("expecting an RPC call message");
    }

    Ok((call, buf))
}

/// Writes one framed reply: fragment header, reply envelope, payload. The
/// payload buffer goes back to the pool afterwards.
pub async fn send_reply<W>(
    w: &mut W,
    reply: &rpc_reply,
    data: Buf,
) -> Result<(), anyhow::Error>
where
    W: AsyncWrite + Unpin,
{
    let payload = data.bytes();

    let mut head = Vec::with_capacity(16);
    let fragment = (12 + payload.len()) as u32 | LAST_FRAGMENT;
    fragment.serialize(&mut head)?;
    reply.serialize(&mut head)?;

    w.write_all(&head).await?;
    w.write_all(payload).await?;

    data.discard();

    Ok(())
}
