mod support;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use nfs4_sable::protocol::rpc;
use nfs4_sable::xdr::nfs4;
use nfs4_sable::xdr::rpc::{
    opaque_auth, rpc_reply, ACCEPT_PROG_MISMATCH, ACCEPT_SUCCESS, AUTH_FLAVOR_NULL,
    AUTH_TOOWEAK, MSG_ACCEPTED, MSG_DENIED, REJECT_AUTH_ERROR, REJECT_RPC_MISMATCH,
};
use nfs4_sable::xdr::{deserialize, Serialize};

use support::{connect, parse_compound, DemoFs};

#[tokio::test]
async fn framing_round_trip() {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);

    // Client side frames a call by hand.
    let call = nfs4_sable::xdr::rpc::rpc_call {
        xid: 1,
        msg_type: nfs4_sable::xdr::rpc::RPC_CALL,
        rpcvers: 2,
        prog: nfs4::PROGRAM,
        vers: nfs4::VERSION,
        proc: nfs4::PROC4_VOID,
        cred: support::unix_auth(),
        verf: opaque_auth::default(),
    };
    let mut record = Vec::new();
    call.serialize(&mut record).unwrap();

    let header = (record.len() as u32 | 1 << 31).to_be_bytes();
    client.write_all(&header).await.unwrap();
    client.write_all(&record).await.unwrap();

    let (received, buf) = rpc::receive_call(&mut server).await.expect("receive_call");
    assert_eq!(received, call);
    assert!(buf.is_empty(), "no argument bytes were sent");

    // Server side frames a reply; the client reads it back.
    let mut payload = nfs4_sable::bufpool::get();
    b"abcd".to_vec().serialize(&mut payload).unwrap();

    let reply = rpc_reply::accepted(call.xid);
    rpc::send_reply(&mut server, &reply, payload).await.expect("send_reply");

    let mut header = [0_u8; 4];
    client.read_exact(&mut header).await.unwrap();
    let fragment = u32::from_be_bytes(header);
    assert!(fragment & (1 << 31) != 0, "last-fragment bit set");

    let len = (fragment & !(1 << 31)) as usize;
    let mut record = vec![0; len];
    client.read_exact(&mut record).await.unwrap();

    let src = &mut record.as_slice();
    let echoed = deserialize::<rpc_reply>(src).unwrap();
    assert_eq!(echoed, reply);
    assert_eq!(deserialize::<Vec<u8>>(src).unwrap(), b"abcd");
}

#[tokio::test]
async fn null_procedure() {
    let mut conn = connect(DemoFs::default()).await;

    let call = conn.next_call(nfs4::PROC4_VOID);
    let (reply, payload) = conn.call(&call, &[]).await;

    assert_eq!(reply.xid, call.xid);
    assert_eq!(reply.reply_stat, MSG_ACCEPTED);

    let src = &mut payload.as_slice();
    let verf = deserialize::<opaque_auth>(src).unwrap();
    assert_eq!(verf.flavor, AUTH_FLAVOR_NULL);
    assert!(verf.body.is_empty());
    assert_eq!(deserialize::<u32>(src).unwrap(), ACCEPT_SUCCESS);
    assert!(src.is_empty());
}

#[tokio::test]
async fn program_version_mismatch() {
    let mut conn = connect(DemoFs::default()).await;

    let mut call = conn.next_call(nfs4::PROC4_VOID);
    call.vers = 3;

    let (reply, payload) = conn.call(&call, &[]).await;

    assert_eq!(reply.reply_stat, MSG_ACCEPTED);

    let src = &mut payload.as_slice();
    deserialize::<opaque_auth>(src).unwrap();
    assert_eq!(deserialize::<u32>(src).unwrap(), ACCEPT_PROG_MISMATCH);
    assert_eq!(deserialize::<u32>(src).unwrap(), 4); // low
    assert_eq!(deserialize::<u32>(src).unwrap(), 4); // high
}

#[tokio::test]
async fn rpc_version_mismatch_is_denied() {
    let mut conn = connect(DemoFs::default()).await;

    let mut call = conn.next_call(nfs4::PROC4_VOID);
    call.rpcvers = 3;

    let (reply, payload) = conn.call(&call, &[]).await;

    assert_eq!(reply.reply_stat, MSG_DENIED);

    let src = &mut payload.as_slice();
    assert_eq!(deserialize::<u32>(src).unwrap(), REJECT_RPC_MISMATCH);
}

#[tokio::test]
async fn weak_auth_flavor_is_denied() {
    let mut conn = connect(DemoFs::default()).await;

    let mut call = conn.next_call(nfs4::PROC4_COMPOUND);
    call.cred = opaque_auth { flavor: AUTH_FLAVOR_NULL, body: Vec::new() };

    let mut body = Vec::new();
    "".serialize(&mut body).unwrap(); // tag
    0_u32.serialize(&mut body).unwrap(); // minor version
    0_u32.serialize(&mut body).unwrap(); // op count

    let (reply, payload) = conn.call(&call, &body).await;

    assert_eq!(reply.reply_stat, MSG_DENIED);

    let src = &mut payload.as_slice();
    assert_eq!(deserialize::<u32>(src).unwrap(), REJECT_AUTH_ERROR);
    assert_eq!(deserialize::<u32>(src).unwrap(), AUTH_TOOWEAK);
}

#[tokio::test]
async fn fragmented_records_are_refused() {
    let mut conn = connect(DemoFs::default()).await;

    // A fragment without the last-fragment bit aborts the connection.
    conn.send_raw(&8_u32.to_be_bytes()).await;
    conn.send_raw(&[0; 8]).await;

    assert!(conn.read_eof().await, "server should hang up");
}

#[tokio::test]
async fn minor_version_mismatch() {
    let mut conn = connect(DemoFs::default()).await;

    let (reply, payload) = conn.compound(3, &[]).await;

    assert_eq!(reply.reply_stat, MSG_ACCEPTED);

    let parsed = parse_compound(&payload);
    assert_eq!(parsed.accept_stat, ACCEPT_SUCCESS);
    assert_eq!(parsed.status, 10021); // NFS4ERR_MINOR_VERS_MISMATCH
    assert_eq!(parsed.ops_count, 0);
    assert!(parsed.results.is_empty());
}
