//! The per-connection request loop.
//!
//! Each accepted connection runs three cooperating tasks wired by bounded
//! channels: a receiver framing calls off the socket, a dispatcher fanning
//! each call out to its own task, and a sender serialising replies back
//! onto the stream. Requests may therefore complete out of order with
//! respect to arrival, but every reply is written contiguously: only the
//! send task touches the stream. A linear variant with no per-request
//! parallelism exists for tests and debugging.
//!
//! The connection is generic over the byte stream so tests can drive it
//! with an in-memory duplex instead of a TCP socket.

use std::sync::Arc;

use anyhow::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::debug;

use crate::bufpool::Buf;
use crate::clients::Clients;
use crate::protocol::nfs::v4::Mux;
use crate::protocol::rpc;
use crate::protocol::xdr::nfs4;
use crate::protocol::xdr::rpc::{
    mismatch_info, opaque_auth, rpc_call, rpc_reply, ACCEPT_PROG_MISMATCH, REJECT_RPC_MISMATCH,
    RPC_VERSION,
};
use crate::protocol::xdr::Serialize;
use crate::worker::WorkerSource;

/// Depth of the request and response channels; receive blocks once the
/// dispatcher falls this far behind, and dispatch blocks once the sender
/// does.
const CHANNEL_CAPACITY: usize = 50;

/// One framed call waiting for dispatch.
struct Request {
    call: rpc_call,
    data: Buf,
}

type Response = Result<(rpc_reply, Buf), Error>;

/// An NFS connection.
pub struct Conn<S> {
    pub stream: S,
    pub clients: Arc<Clients>,
    pub workers: Arc<dyn WorkerSource>,
    pub remote: String,
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Serves the connection with per-request parallelism until the peer
    /// hangs up, an error occurs or `shutdown` fires.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
        let mux = Arc::new(Mux {
            clients: self.clients,
            workers: self.workers,
            remote: self.remote,
        });

        let (read_half, write_half) = tokio::io::split(self.stream);

        let (req_tx, mut req_rx) = mpsc::channel::<Request>(CHANNEL_CAPACITY);
        let (resp_tx, mut resp_rx) = mpsc::channel::<Response>(CHANNEL_CAPACITY);

        let receiver = async move {
            let mut reader = read_half;
            loop {
                let received = tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    received = rpc::receive_call(&mut reader) => received,
                };

                let (call, data) = match received {
                    Ok(received) => received,
                    Err(err) if is_disconnect(&err) => return Ok(()),
                    Err(err) => return Err(err),
                };

                if req_tx.send(Request { call, data }).await.is_err() {
                    return Ok(());
                }
            }
        };

        let dispatcher = async {
            let mut tasks = JoinSet::new();

            while let Some(request) = req_rx.recv().await {
                let mux = Arc::clone(&mux);
                let resp_tx = resp_tx.clone();

                tasks.spawn(async move {
                    let response = dispatch(&mux, request).await;
                    let _ = resp_tx.send(response).await;
                });
            }

            drop(resp_tx);

            while tasks.join_next().await.is_some() {}

            Ok::<(), Error>(())
        };

        let sender = async {
            let mut writer = BufWriter::new(write_half);

            while let Some(response) = resp_rx.recv().await {
                let (reply, data) = response?;
                rpc::send_reply(&mut writer, &reply, data).await?;

                // Flush once the backlog drains; consecutive replies share
                // a flush.
                loop {
                    match resp_rx.try_recv() {
                        Ok(next) => {
                            let (reply, data) = next?;
                            rpc::send_reply(&mut writer, &reply, data).await?;
                        }
                        Err(_) => break,
                    }
                }

                tokio::io::AsyncWriteExt::flush(&mut writer).await?;
            }

            tokio::io::AsyncWriteExt::flush(&mut writer).await?;

            Ok::<(), Error>(())
        };

        tokio::try_join!(receiver, dispatcher, sender)?;

        Ok(())
    }

    /// Serves requests one at a time in arrival order. Used by tests; the
    /// reply for each call is written before the next call is read.
    pub async fn serve_linear(self, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
        let mux = Mux {
            clients: self.clients,
            workers: self.workers,
            remote: self.remote,
        };

        let (read_half, write_half) = tokio::io::split(self.stream);
        let mut reader = read_half;
        let mut writer = BufWriter::new(write_half);

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                received = rpc::receive_call(&mut reader) => received,
            };

            let (call, data) = match received {
                Ok(received) => received,
                Err(err) if is_disconnect(&err) => return Ok(()),
                Err(err) => return Err(err),
            };

            let (reply, payload) = dispatch(&mux, Request { call, data }).await?;

            rpc::send_reply(&mut writer, &reply, payload).await?;
            tokio::io::AsyncWriteExt::flush(&mut writer).await?;
        }
    }
}

/// Routes one call: envelope validation first, then the NFSv4 multiplexer.
async fn dispatch(mux: &Mux, request: Request) -> Response {
    let Request { call, data } = request;

    if call.rpcvers != RPC_VERSION {
        debug!("invalid RPC version {} != {RPC_VERSION}", call.rpcvers);
        return rpc_mismatch_reply(&call, data);
    }

    if call.prog != nfs4::PROGRAM || call.vers != nfs4::VERSION {
        debug!("program mismatch: prog {} vers {}", call.prog, call.vers);
        return prog_mismatch_reply(&call, data);
    }

    mux.handle(&call, data).await
}

/// An accepted reply telling the caller which program versions exist here:
/// NFS version 4 only.
fn prog_mismatch_reply(call: &rpc_call, mut data: Buf) -> Response {
    data.reset();

    opaque_auth::default().serialize(&mut data)?;
    ACCEPT_PROG_MISMATCH.serialize(&mut data)?;
    mismatch_info { low: nfs4::VERSION, high: nfs4::VERSION }.serialize(&mut data)?;

    Ok((rpc_reply::accepted(call.xid), data))
}

/// A denied reply for callers not speaking RPC version 2.
fn rpc_mismatch_reply(call: &rpc_call, mut data: Buf) -> Response {
    data.reset();

    REJECT_RPC_MISMATCH.serialize(&mut data)?;
    mismatch_info { low: RPC_VERSION, high: RPC_VERSION }.serialize(&mut data)?;

    Ok((rpc_reply::denied(call.xid), data))
}

/// True for errors that just mean the peer went away.
fn is_disconnect(err: &Error) -> bool {
    err.downcast_ref::<std::io::Error>().is_some_and(|io_err| {
        matches!(
            io_err.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
        )
    })
}
