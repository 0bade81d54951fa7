use std::time::Duration;

use nfs4_sable::auth::Creds;
use nfs4_sable::bufpool;
use nfs4_sable::clients::{client_id_from_session_id, Clients, SlotCheck, MAX_SLOT_ID};
use nfs4_sable::xdr::nfs4::nfsstat4;

fn creds(uid: u32, gid: u32, groups: &[u32]) -> Creds {
    Creds {
        stamp: 0,
        hostname: "test".to_string(),
        uid,
        gid,
        additional_groups: groups.to_vec(),
    }
}

#[test]
fn creds_equality_is_reflexive_and_symmetric() {
    let a = creds(1, 10, &[20, 30]);
    let b = creds(1, 10, &[20, 30]);

    assert!(a.equal(&a));
    assert!(a.equal(&b));
    assert!(b.equal(&a));
}

#[test]
fn creds_equality_ignores_group_order_and_duplicates() {
    let a = creds(1, 10, &[20, 30]);
    let b = creds(1, 10, &[30, 20]);
    let c = creds(1, 10, &[30, 20, 20, 10]);

    assert!(a.equal(&b));
    assert!(a.equal(&c));
}

#[test]
fn creds_equality_folds_gid_into_group_set() {
    // The primary gid and an identical auxiliary entry count once.
    let a = creds(1, 10, &[10, 20]);
    let b = creds(1, 20, &[10]);

    assert!(a.equal(&b));
}

#[test]
fn creds_inequality() {
    let a = creds(1, 10, &[20]);

    assert!(!a.equal(&creds(2, 10, &[20])));
    assert!(!a.equal(&creds(1, 10, &[21])));
    assert!(!a.equal(&creds(1, 10, &[20, 30])));
}

#[test]
fn add_and_confirm_flow() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (id, confirm, seq) = clients.add(b"client-a", 7, &me).expect("add");
    assert_eq!(seq, 1);

    // Unconfirmed clients are invisible to lookups.
    assert!(clients.get(id).is_none());

    // Wrong confirm value.
    assert_eq!(
        clients.confirm(id, confirm.wrapping_add(1), &me),
        Err(nfsstat4::NFS4ERR_STALE_CLIENTID)
    );

    // Wrong credentials.
    assert_eq!(
        clients.confirm(id, confirm, &creds(2, 10, &[])),
        Err(nfsstat4::NFS4ERR_CLID_INUSE)
    );

    clients.confirm(id, confirm, &me).expect("confirm");
    assert!(clients.get(id).is_some());
}

#[test]
fn readd_refreshes_confirmed_client() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (id, confirm, _) = clients.add(b"client-a", 7, &me).expect("add");
    clients.confirm(id, confirm, &me).expect("confirm");

    // Same name and verifier: the client is refreshed in place with a new
    // confirm value.
    let (id2, confirm2, seq2) = clients.add(b"client-a", 7, &me).expect("re-add");
    assert_eq!(id2, id);
    assert_ne!(confirm2, confirm);
    assert_eq!(seq2, 2);

    // Same name under other credentials is refused.
    assert_eq!(
        clients.add(b"client-a", 7, &creds(2, 10, &[])),
        Err(nfsstat4::NFS4ERR_CLID_INUSE)
    );
}

#[test]
fn confirm41_sequencing() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (id, _, seq) = clients.add(b"client-b", 1, &me).expect("add");

    // Unconfirmed: requires the exact sequence id.
    assert_eq!(
        clients.confirm41(id, seq + 1, &me),
        Err(nfsstat4::NFS4ERR_STALE_CLIENTID)
    );
    clients.confirm41(id, seq, &me).expect("confirm41");

    // Confirmed: replay of the current id is fine, advancing is fine,
    // going backwards is misordered.
    clients.confirm41(id, seq, &me).expect("replay");
    clients.confirm41(id, seq + 1, &me).expect("advance");
    assert_eq!(
        clients.confirm41(id, seq, &me),
        Err(nfsstat4::NFS4ERR_SEQ_MISORDERED)
    );
}

#[test]
fn session_id_embeds_client_id() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (id, confirm, _) = clients.add(b"client-c", 1, &me).expect("add");
    clients.confirm(id, confirm, &me).expect("confirm");

    let session_id = clients.build_session(id, false).expect("session");
    assert_eq!(client_id_from_session_id(session_id), id);
}

#[test]
fn slot_sequencing_without_persistence() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (id, confirm, _) = clients.add(b"client-d", 1, &me).expect("add");
    clients.confirm(id, confirm, &me).expect("confirm");
    let session_id = clients.build_session(id, false).expect("session");

    let mut out = bufpool::get();

    // Fresh slot advances from 0 to 1; nothing can be cached.
    assert_eq!(
        clients.slot_begin(session_id, 0, 1, true, &mut out),
        Ok(SlotCheck::Execute { cache: false })
    );

    // Replaying the same id finds no cached bytes.
    assert_eq!(
        clients.slot_begin(session_id, 0, 1, true, &mut out),
        Ok(SlotCheck::RetryUncached)
    );

    // Jumping ahead is misordered.
    assert_eq!(
        clients.slot_begin(session_id, 0, 5, false, &mut out),
        Ok(SlotCheck::Misordered)
    );

    // Slot ids beyond the table are a dead session.
    assert_eq!(
        clients.slot_begin(session_id, MAX_SLOT_ID + 1, 1, false, &mut out),
        Err(nfsstat4::NFS4ERR_DEADSESSION)
    );

    out.discard();
}

#[test]
fn slot_replay_returns_cached_bytes() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (id, confirm, _) = clients.add(b"client-e", 1, &me).expect("add");
    clients.confirm(id, confirm, &me).expect("confirm");
    let session_id = clients.build_session(id, true).expect("session");

    let mut out = bufpool::get();
    assert_eq!(
        clients.slot_begin(session_id, 3, 1, true, &mut out),
        Ok(SlotCheck::Execute { cache: true })
    );

    std::io::Write::write_all(&mut out, b"cached-reply").unwrap();
    clients.slot_store(session_id, 3, &out);
    out.discard();

    let mut replayed = bufpool::get();
    assert_eq!(
        clients.slot_begin(session_id, 3, 1, true, &mut replayed),
        Ok(SlotCheck::Replay)
    );
    assert_eq!(replayed.bytes(), b"cached-reply");
    replayed.discard();
}

#[test]
fn unknown_session_is_dead() {
    let clients = Clients::new();
    let mut out = bufpool::get();

    assert_eq!(
        clients.slot_begin([1; 16], 0, 1, false, &mut out),
        Err(nfsstat4::NFS4ERR_DEADSESSION)
    );

    out.discard();
}

#[test]
fn remove_client_respects_busy_count() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (id, confirm, _) = clients.add(b"client-f", 1, &me).expect("add");

    // Unconfirmed clients cannot be destroyed.
    assert_eq!(clients.remove_client(id), Err(nfsstat4::NFS4ERR_STALE_CLIENTID));

    clients.confirm(id, confirm, &me).expect("confirm");

    clients.add_busy(id, 1);
    assert_eq!(clients.remove_client(id), Err(nfsstat4::NFS4ERR_CLIENTID_BUSY));

    clients.done(id);
    clients.remove_client(id).expect("remove");
    assert!(clients.get(id).is_none());
}

#[test]
fn expiration_sweep_skips_busy_clients() {
    let clients = Clients::new();
    let me = creds(1, 10, &[]);

    let (busy_id, c1, _) = clients.add(b"busy", 1, &me).expect("add");
    clients.confirm(busy_id, c1, &me).expect("confirm");
    clients.add_busy(busy_id, 1);

    let (idle_id, c2, _) = clients.add(b"idle", 1, &me).expect("add");
    clients.confirm(idle_id, c2, &me).expect("confirm");

    // Let the cached clock tick past the last-seen stamps.
    std::thread::sleep(Duration::from_millis(2100));

    let removed = clients.remove_expired(Duration::from_secs(1));

    assert_eq!(removed, vec![idle_id]);
    assert!(clients.get(busy_id).is_some());
    assert!(clients.get(idle_id).is_none());
}
