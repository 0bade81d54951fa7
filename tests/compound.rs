mod support;

use nfs4_sable::protocol::nfs::v4::attrs::{A_MODE, A_SIZE, A_TYPE};
use nfs4_sable::protocol::nfs::v4::Bitmap;
use nfs4_sable::xdr::nfs4::{
    self, fattr4, nfs_client_id4, nfsstat4, open_claim4, open_owner4, openflag4, stateid4,
    CLOSE4args, CREATE_SESSION4args, CREATE_SESSION4resok, EXCHANGE_ID4args, EXCHANGE_ID4resok,
    GETATTR4args, GETATTR4resok, GETFH4resok, GETXATTR4args, GETXATTR4resok, LISTXATTRS4args,
    LISTXATTRS4resok, LOOKUP4args, OPEN4args, OPEN4resok, PUTFH4args, READ4args, READ4resok,
    READDIR4args, READDIR4resok, REMOVEXATTR4args, SEQUENCE4args, SETCLIENTID4args,
    SETCLIENTID4resok, SETCLIENTID_CONFIRM4args, SETXATTR4args, WRITE4args, WRITE4resok,
    client_owner4,
};
use nfs4_sable::xdr::rpc::MSG_ACCEPTED;

use support::{connect, op, parse_compound, read_op_header, read_res, DemoFs, TestConn};

const OK: u32 = nfsstat4::NFS4_OK as u32;

/// Runs the v4.0 SETCLIENTID / SETCLIENTID_CONFIRM handshake and returns
/// the confirmed client id.
async fn handshake(conn: &mut TestConn, name: &[u8], verifier: u64) -> u64 {
    let args = SETCLIENTID4args {
        client: nfs_client_id4 { verifier, id: name.to_vec() },
        ..Default::default()
    };

    let (_, payload) = conn.compound(0, &[op(nfs4::OP4_SETCLIENTID, &[&args])]).await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_SETCLIENTID, OK));
    let resok: SETCLIENTID4resok = read_res(src);

    let confirm = SETCLIENTID_CONFIRM4args {
        clientid: resok.clientid,
        setclientid_confirm: resok.setclientid_confirm,
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_SETCLIENTID_CONFIRM, &[&confirm])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    resok.clientid
}

/// Runs EXCHANGE_ID + CREATE_SESSION and returns (client id, session id).
async fn create_session(conn: &mut TestConn, name: &[u8], persist: bool) -> (u64, [u8; 16]) {
    let args = EXCHANGE_ID4args {
        client_owner: client_owner4 { verifier: 2, ownerid: name.to_vec() },
        ..Default::default()
    };

    let (_, payload) = conn.compound(1, &[op(nfs4::OP4_EXCHANGE_ID, &[&args])]).await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_EXCHANGE_ID, OK));
    let exchanged: EXCHANGE_ID4resok = read_res(src);

    let args = CREATE_SESSION4args {
        clientid: exchanged.clientid,
        sequenceid: exchanged.sequenceid,
        flags: if persist { nfs4::CREATE_SESSION4_FLAG_PERSIST } else { 0 },
        ..Default::default()
    };

    let (_, payload) = conn.compound(1, &[op(nfs4::OP4_CREATE_SESSION, &[&args])]).await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_CREATE_SESSION, OK));
    let session: CREATE_SESSION4resok = read_res(src);

    (exchanged.clientid, session.sessionid)
}

fn sequence_op(sessionid: [u8; 16], sequenceid: u32, cachethis: bool) -> Vec<u8> {
    op(
        nfs4::OP4_SEQUENCE,
        &[&SEQUENCE4args {
            sessionid,
            sequenceid,
            slotid: 0,
            highest_slotid: 15,
            cachethis,
        }],
    )
}

#[tokio::test]
async fn v40_handshake_and_refresh() {
    let mut conn = connect(DemoFs::default()).await;

    let args = SETCLIENTID4args {
        client: nfs_client_id4 { verifier: 1, id: b"c1".to_vec() },
        ..Default::default()
    };

    let (reply, payload) = conn.compound(0, &[op(nfs4::OP4_SETCLIENTID, &[&args])]).await;
    assert_eq!(reply.reply_stat, MSG_ACCEPTED);

    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);
    assert_eq!(parsed.ops_count, 1);

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_SETCLIENTID, OK));
    let first: SETCLIENTID4resok = read_res(src);

    let confirm = SETCLIENTID_CONFIRM4args {
        clientid: first.clientid,
        setclientid_confirm: first.setclientid_confirm,
    };
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_SETCLIENTID_CONFIRM, &[&confirm])])
        .await;
    assert_eq!(parse_compound(&payload).status, OK);

    // Re-registering with the same verifier returns the same client id and
    // a fresh confirm value.
    let (_, payload) = conn.compound(0, &[op(nfs4::OP4_SETCLIENTID, &[&args])]).await;
    let parsed = parse_compound(&payload);
    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    let second: SETCLIENTID4resok = read_res(src);

    assert_eq!(second.clientid, first.clientid);
    assert_ne!(second.setclientid_confirm, first.setclientid_confirm);
}

#[tokio::test]
async fn v41_session_creation() {
    let mut conn = connect(DemoFs::default()).await;

    let (clientid, sessionid) = create_session(&mut conn, b"c2", false).await;

    assert_eq!(sessionid[..8], clientid.to_be_bytes()[..]);
}

#[tokio::test]
async fn sequenced_compound_executes_operations() {
    let mut conn = connect(DemoFs::default()).await;
    let (_, sessionid) = create_session(&mut conn, b"c3", false).await;

    let (_, payload) = conn
        .compound(1, &[sequence_op(sessionid, 1, false), op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_GETFH, &[])])
        .await;

    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);
    assert_eq!(parsed.ops_count, 3);

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_SEQUENCE, OK));
    let _seq: nfs4::SEQUENCE4resok = read_res(src);
    assert_eq!(read_op_header(src), (nfs4::OP4_PUTROOTFH, OK));
    assert_eq!(read_op_header(src), (nfs4::OP4_GETFH, OK));
    let fh: GETFH4resok = read_res(src);
    assert!(!fh.object.is_empty());
}

#[tokio::test]
async fn reply_cache_replay_is_byte_identical() {
    let mut conn = connect(DemoFs::default()).await;
    let (_, sessionid) = create_session(&mut conn, b"c4", true).await;

    let ops = [sequence_op(sessionid, 1, true), op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_GETFH, &[])];

    let (_, first) = conn.compound(1, &ops).await;
    assert_eq!(parse_compound(&first).status, OK);

    let (_, second) = conn.compound(1, &ops).await;

    assert_eq!(first, second, "replayed reply must be byte-identical");
}

#[tokio::test]
async fn uncached_retry_is_refused_without_persistence() {
    let mut conn = connect(DemoFs::default()).await;
    let (_, sessionid) = create_session(&mut conn, b"c5", false).await;

    let ops = [sequence_op(sessionid, 1, true), op(nfs4::OP4_PUTROOTFH, &[])];

    let (_, payload) = conn.compound(1, &ops).await;
    assert_eq!(parse_compound(&payload).status, OK);

    let (_, payload) = conn.compound(1, &ops).await;
    let parsed = parse_compound(&payload);

    assert_eq!(parsed.status, nfsstat4::NFS4ERR_RETRY_UNCACHED_REP as u32);
    assert_eq!(parsed.ops_count, 1);
}

#[tokio::test]
async fn out_of_order_sequence_is_misordered() {
    let mut conn = connect(DemoFs::default()).await;
    let (_, sessionid) = create_session(&mut conn, b"c6", false).await;

    let (_, payload) = conn.compound(1, &[sequence_op(sessionid, 5, false)]).await;
    let parsed = parse_compound(&payload);

    assert_eq!(parsed.status, nfsstat4::NFS4ERR_SEQ_MISORDERED as u32);
    assert_eq!(parsed.ops_count, 1);

    let src = &mut parsed.results.as_slice();
    assert_eq!(
        read_op_header(src),
        (nfs4::OP4_SEQUENCE, nfsstat4::NFS4ERR_SEQ_MISORDERED as u32)
    );
}

#[tokio::test]
async fn sessionless_first_op_is_rejected_under_v41() {
    let mut conn = connect(DemoFs::default()).await;

    let (_, payload) = conn.compound(1, &[op(nfs4::OP4_PUTROOTFH, &[])]).await;
    let parsed = parse_compound(&payload);

    assert_eq!(parsed.status, nfsstat4::NFS4ERR_OP_NOT_IN_SESSION as u32);
    assert_eq!(parsed.ops_count, 1);
}

#[tokio::test]
async fn non_sequence_first_op_must_travel_alone() {
    let mut conn = connect(DemoFs::default()).await;

    let args = EXCHANGE_ID4args {
        client_owner: client_owner4 { verifier: 9, ownerid: b"c7".to_vec() },
        ..Default::default()
    };

    let (_, payload) = conn
        .compound(1, &[op(nfs4::OP4_EXCHANGE_ID, &[&args]), op(nfs4::OP4_PUTROOTFH, &[])])
        .await;
    let parsed = parse_compound(&payload);

    assert_eq!(parsed.status, nfsstat4::NFS4ERR_NOT_ONLY_OP as u32);
    assert_eq!(parsed.ops_count, 1);
}

#[tokio::test]
async fn fatal_status_truncates_the_compound() {
    let mut conn = connect(DemoFs::default()).await;

    let bad_fh = PUTFH4args { object: b"nonsense".to_vec() };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTFH, &[&bad_fh]), op(nfs4::OP4_PUTROOTFH, &[])])
        .await;
    let parsed = parse_compound(&payload);

    assert_eq!(parsed.status, nfsstat4::NFS4ERR_STALE as u32);
    assert_eq!(parsed.ops_count, 1, "the second operation must not run");

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_PUTFH, nfsstat4::NFS4ERR_STALE as u32));
    assert!(src.is_empty());
}

#[tokio::test]
async fn open_read_close() {
    let fs = DemoFs::default().with_file("/x", b"abcd");
    let mut conn = connect(fs).await;

    let clientid = handshake(&mut conn, b"c8", 1).await;

    // OPEN for read via PUTROOTFH, grab the filehandle for later.
    let open_args = OPEN4args {
        seqid: 1,
        share_access: nfs4::OPEN4_SHARE_ACCESS_READ,
        share_deny: 0,
        owner: open_owner4 { clientid, owner: b"owner-1".to_vec() },
        openhow: openflag4::NoCreate,
        claim: open_claim4::Null("x".to_string()),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_OPEN, &[&open_args]), op(nfs4::OP4_GETFH, &[])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);
    assert_eq!(parsed.ops_count, 3);

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_PUTROOTFH, OK));
    assert_eq!(read_op_header(src), (nfs4::OP4_OPEN, OK));
    let opened: OPEN4resok = read_res(src);
    assert_eq!(opened.stateid.seqid, 1);
    assert_eq!(read_op_header(src), (nfs4::OP4_GETFH, OK));
    let fh: GETFH4resok = read_res(src);

    // READ and CLOSE against the opened file.
    let putfh = PUTFH4args { object: fh.object.clone() };
    let read_args = READ4args { stateid: opened.stateid, offset: 0, count: 4 };
    let close_args = CLOSE4args { seqid: 1, open_stateid: opened.stateid };

    let (_, payload) = conn
        .compound(
            0,
            &[
                op(nfs4::OP4_PUTFH, &[&putfh]),
                op(nfs4::OP4_READ, &[&read_args]),
                op(nfs4::OP4_CLOSE, &[&close_args]),
            ],
        )
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);
    assert_eq!(parsed.ops_count, 3);

    let src = &mut parsed.results.as_slice();
    assert_eq!(read_op_header(src), (nfs4::OP4_PUTFH, OK));
    assert_eq!(read_op_header(src), (nfs4::OP4_READ, OK));
    let read: READ4resok = read_res(src);
    assert!(read.eof);
    assert_eq!(read.data, b"abcd");
    assert_eq!(read_op_header(src), (nfs4::OP4_CLOSE, OK));
    let closed: stateid4 = read_res(src);
    assert_eq!(closed.seqid, 2);

    // CLOSE is idempotent: a replay succeeds with the same seqid.
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTFH, &[&putfh]), op(nfs4::OP4_CLOSE, &[&close_args])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    assert_eq!(read_op_header(src), (nfs4::OP4_CLOSE, OK));
    let closed: stateid4 = read_res(src);
    assert_eq!(closed.seqid, 2);
}

#[tokio::test]
async fn read_with_foreign_filehandle_is_refused() {
    let fs = DemoFs::default().with_file("/x", b"abcd");
    let mut conn = connect(fs).await;

    let clientid = handshake(&mut conn, b"c9", 1).await;

    let open_args = OPEN4args {
        seqid: 1,
        share_access: nfs4::OPEN4_SHARE_ACCESS_READ,
        share_deny: 0,
        owner: open_owner4 { clientid, owner: b"owner-1".to_vec() },
        openhow: openflag4::NoCreate,
        claim: open_claim4::Null("x".to_string()),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_OPEN, &[&open_args])])
        .await;
    let parsed = parse_compound(&payload);
    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    let opened: OPEN4resok = read_res(src);

    // The current filehandle is the root, not the opened file.
    let read_args = READ4args { stateid: opened.stateid, offset: 0, count: 4 };
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_READ, &[&read_args])])
        .await;
    let parsed = parse_compound(&payload);

    assert_eq!(parsed.status, nfsstat4::NFS4ERR_BAD_SEQID as u32);
}

#[tokio::test]
async fn write_reports_file_sync_and_session_verifier() {
    let fs = DemoFs::default().with_file("/w", b"abcd");
    let mut conn = connect(fs.clone()).await;

    let clientid = handshake(&mut conn, b"c10", 1).await;

    let open_args = OPEN4args {
        seqid: 1,
        share_access: nfs4::OPEN4_SHARE_ACCESS_WRITE,
        share_deny: 0,
        owner: open_owner4 { clientid, owner: b"owner-1".to_vec() },
        openhow: openflag4::NoCreate,
        claim: open_claim4::Null("w".to_string()),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_OPEN, &[&open_args]), op(nfs4::OP4_GETFH, &[])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    let opened: OPEN4resok = read_res(src);
    read_op_header(src);
    let fh: GETFH4resok = read_res(src);

    let putfh = PUTFH4args { object: fh.object };
    let write_args = WRITE4args {
        stateid: opened.stateid,
        offset: 1,
        stable: nfs4::UNSTABLE4,
        data: b"xy".to_vec(),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTFH, &[&putfh]), op(nfs4::OP4_WRITE, &[&write_args])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    assert_eq!(read_op_header(src), (nfs4::OP4_WRITE, OK));
    let first: WRITE4resok = read_res(src);

    assert_eq!(first.count, 2);
    assert_eq!(first.committed, nfs4::FILE_SYNC4);
    assert_eq!(fs.file_data("/w").unwrap(), b"axyd");

    // The verifier is the worker's session verifier and stays put across
    // writes.
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTFH, &[&putfh]), op(nfs4::OP4_WRITE, &[&write_args])])
        .await;
    let parsed = parse_compound(&payload);
    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    let second: WRITE4resok = read_res(src);

    assert_eq!(first.writeverf, second.writeverf);
}

#[tokio::test]
async fn readdir_paginates_with_byte_budget() {
    let fs = DemoFs::default()
        .with_file("/a", b"1")
        .with_file("/b", b"2")
        .with_file("/c", b"3");
    let mut conn = connect(fs).await;

    // maxcount chosen so exactly two one-character entries fit.
    let first_args = READDIR4args {
        cookie: 0,
        cookieverf: 0,
        dircount: 1000,
        maxcount: 160,
        attr_request: Vec::new(),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_READDIR, &[&first_args])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    assert_eq!(read_op_header(src), (nfs4::OP4_READDIR, OK));
    let first: READDIR4resok = read_res(src);

    assert!(!first.reply.eof);
    assert_ne!(first.cookieverf, u64::MAX);

    let e1 = first.reply.entries.expect("first entry");
    assert_eq!(e1.name, "a");
    assert_eq!(e1.cookie, 1001);
    let e2 = e1.nextentry.expect("second entry");
    assert_eq!(e2.name, "b");
    assert_eq!(e2.cookie, 1002);
    assert!(e2.nextentry.is_none());

    // Resume at the last cookie with the verifier we were given.
    let second_args = READDIR4args {
        cookie: e2.cookie,
        cookieverf: first.cookieverf,
        dircount: 1000,
        maxcount: 10_000,
        attr_request: Vec::new(),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_READDIR, &[&second_args])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    let second: READDIR4resok = read_res(src);

    assert!(second.reply.eof);
    assert_eq!(second.cookieverf, u64::MAX);

    let e3 = second.reply.entries.expect("third entry");
    assert_eq!(e3.name, "c");
    assert_eq!(e3.cookie, 1003);
    assert!(e3.nextentry.is_none());
}

#[tokio::test]
async fn readdir_with_unknown_verifier_is_not_same() {
    let mut conn = connect(DemoFs::default()).await;

    let args = READDIR4args {
        cookie: 1001,
        cookieverf: 0x1234,
        dircount: 1000,
        maxcount: 1000,
        attr_request: Vec::new(),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_READDIR, &[&args])])
        .await;
    let parsed = parse_compound(&payload);

    assert_eq!(parsed.status, nfsstat4::NFS4ERR_NOT_SAME as u32);
}

#[tokio::test]
async fn getattr_returns_requested_attributes() {
    let mut conn = connect(DemoFs::default()).await;

    let args = GETATTR4args {
        attr_request: Bitmap::from_ids([A_TYPE, A_SIZE]).words(),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_GETATTR, &[&args])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    assert_eq!(read_op_header(src), (nfs4::OP4_GETATTR, OK));
    let resok: GETATTR4resok = read_res(src);

    let mask = Bitmap::from_words(&resok.obj_attributes.attrmask);
    assert!(mask.contains(A_TYPE));
    assert!(mask.contains(A_SIZE));

    // type (4 bytes, NF4DIR) then size (8 bytes, 0) in ascending id order.
    let mut expected = Vec::new();
    expected.extend_from_slice(&nfs4::NF4DIR.to_be_bytes());
    expected.extend_from_slice(&0_u64.to_be_bytes());
    assert_eq!(resok.obj_attributes.attr_vals, expected);
}

#[tokio::test]
async fn unsupported_attributes_are_dropped_from_the_mask() {
    let mut conn = connect(DemoFs::default()).await;

    // Attribute 14 (aclsupport neighbour range) is not served.
    let args = GETATTR4args {
        attr_request: Bitmap::from_ids([A_TYPE, 14]).words(),
    };

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_GETATTR, &[&args])])
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    let resok: GETATTR4resok = read_res(src);

    let mask = Bitmap::from_words(&resok.obj_attributes.attrmask);
    assert!(mask.contains(A_TYPE));
    assert!(!mask.contains(14));
}

#[tokio::test]
async fn verify_and_nverify() {
    let mut conn = connect(DemoFs::default()).await;

    let matching = fattr4 {
        attrmask: Bitmap::from_ids([A_TYPE]).words(),
        attr_vals: nfs4::NF4DIR.to_be_bytes().to_vec(),
    };
    let mismatching = fattr4 {
        attrmask: Bitmap::from_ids([A_TYPE]).words(),
        attr_vals: nfs4::NF4REG.to_be_bytes().to_vec(),
    };

    // VERIFY with matching attributes passes and execution continues.
    let (_, payload) = conn
        .compound(
            0,
            &[
                op(nfs4::OP4_PUTROOTFH, &[]),
                op(nfs4::OP4_VERIFY, &[&matching]),
                op(nfs4::OP4_GETFH, &[]),
            ],
        )
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);
    assert_eq!(parsed.ops_count, 3);

    // VERIFY with a mismatch answers NOT_SAME.
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_VERIFY, &[&mismatching])])
        .await;
    assert_eq!(parse_compound(&payload).status, nfsstat4::NFS4ERR_NOT_SAME as u32);

    // NVERIFY is the mirror image.
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_NVERIFY, &[&matching])])
        .await;
    assert_eq!(parse_compound(&payload).status, nfsstat4::NFS4ERR_SAME as u32);

    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_NVERIFY, &[&mismatching])])
        .await;
    assert_eq!(parse_compound(&payload).status, OK);
}

#[tokio::test]
async fn lookup_validation() {
    let mut conn = connect(DemoFs::default()).await;

    // Empty names are invalid.
    let empty = LOOKUP4args { objname: String::new() };
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_LOOKUP, &[&empty])])
        .await;
    assert_eq!(parse_compound(&payload).status, nfsstat4::NFS4ERR_INVAL as u32);

    // LOOKUPP at the root is invalid.
    let (_, payload) = conn
        .compound(0, &[op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_LOOKUPP, &[])])
        .await;
    assert_eq!(parse_compound(&payload).status, nfsstat4::NFS4ERR_INVAL as u32);

    // An operation needing a filehandle without one set.
    let (_, payload) = conn.compound(0, &[op(nfs4::OP4_GETFH, &[])]).await;
    assert_eq!(parse_compound(&payload).status, nfsstat4::NFS4ERR_NOFILEHANDLE as u32);
}

#[tokio::test]
async fn xattr_round_trip() {
    let fs = DemoFs::default().with_file("/x", b"data");
    let mut conn = connect(fs).await;

    let to_file = [op(nfs4::OP4_PUTROOTFH, &[]), op(nfs4::OP4_LOOKUP, &[&LOOKUP4args { objname: "x".to_string() }])];

    // SETXATTR
    let set = SETXATTR4args {
        option: nfs4::SETXATTR4_EITHER,
        name: "k".to_string(),
        value: b"v".to_vec(),
    };
    let mut ops = to_file.to_vec();
    ops.push(op(nfs4::OP4_SETXATTR, &[&set]));
    let (_, payload) = conn.compound(0, &ops).await;
    assert_eq!(parse_compound(&payload).status, OK);

    // GETXATTR sees the value.
    let get = GETXATTR4args { name: "k".to_string() };
    let mut ops = to_file.to_vec();
    ops.push(op(nfs4::OP4_GETXATTR, &[&get]));
    let (_, payload) = conn.compound(0, &ops).await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    read_op_header(src);
    let value: GETXATTR4resok = read_res(src);
    assert_eq!(value.value, b"v");

    // LISTXATTRS reports the unprefixed name.
    let list = LISTXATTRS4args { cookie: 0, maxcount: 1000 };
    let mut ops = to_file.to_vec();
    ops.push(op(nfs4::OP4_LISTXATTRS, &[&list]));
    let (_, payload) = conn.compound(0, &ops).await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    read_op_header(src);
    let listed: LISTXATTRS4resok = read_res(src);
    assert!(listed.eof);
    assert_eq!(listed.names, vec!["k".to_string()]);

    // REMOVEXATTR, then the attribute is gone.
    let remove = REMOVEXATTR4args { name: "k".to_string() };
    let mut ops = to_file.to_vec();
    ops.push(op(nfs4::OP4_REMOVEXATTR, &[&remove]));
    let (_, payload) = conn.compound(0, &ops).await;
    assert_eq!(parse_compound(&payload).status, OK);

    let mut ops = to_file.to_vec();
    ops.push(op(nfs4::OP4_GETXATTR, &[&get]));
    let (_, payload) = conn.compound(0, &ops).await;
    assert_eq!(parse_compound(&payload).status, nfsstat4::NFS4ERR_NOXATTR as u32);
}

#[tokio::test]
async fn setattr_reports_changed_attributes() {
    let fs = DemoFs::default().with_file("/x", b"data");
    let mut conn = connect(fs.clone()).await;

    let set = nfs4::SETATTR4args {
        stateid: stateid4::default(),
        obj_attributes: fattr4 {
            attrmask: Bitmap::from_ids([A_MODE]).words(),
            attr_vals: 0o600_u32.to_be_bytes().to_vec(),
        },
    };

    let (_, payload) = conn
        .compound(
            0,
            &[
                op(nfs4::OP4_PUTROOTFH, &[]),
                op(nfs4::OP4_LOOKUP, &[&LOOKUP4args { objname: "x".to_string() }]),
                op(nfs4::OP4_SETATTR, &[&set]),
            ],
        )
        .await;
    let parsed = parse_compound(&payload);
    assert_eq!(parsed.status, OK);

    let src = &mut parsed.results.as_slice();
    read_op_header(src);
    read_op_header(src);
    assert_eq!(read_op_header(src), (nfs4::OP4_SETATTR, OK));
    let changed: Vec<u32> = read_res(src);

    let mask = Bitmap::from_words(&changed);
    assert!(mask.contains(A_MODE));
}
