//! Client registry: identities, confirmation state, sessions and slots.
//!
//! A client record is created by SETCLIENTID (v4.0) or EXCHANGE_ID (v4.1+)
//! and confirmed by SETCLIENTID_CONFIRM or CREATE_SESSION. Confirmed v4.1
//! clients own sessions: 16 reply-cache slots each, addressed by a 16-byte
//! session id whose upper half is the client id and whose lower half is a
//! random cache id — the split makes the client lookup for SEQUENCE a
//! direct map access instead of a search.
//!
//! The registry is one mutex around one map. Client records have no lock of
//! their own; every mutation, including slot bookkeeping, happens as a
//! registry operation under the single lock, which rules out lock-order
//! cycles between the registry and individual clients. A background sweep
//! removes clients not seen within the expiration window, skipping any with
//! open files.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::Creds;
use crate::bufpool::{self, Buf};
use crate::clock;
use crate::protocol::xdr::nfs4::nfsstat4;

/// Clients unseen for this long are removed by the sweeper; also advertised
/// to clients as the lease time.
pub const CLIENT_EXPIRATION: Duration = Duration::from_secs(300);

/// The maximum slot id for use in a session (slots start at 0).
pub const MAX_SLOT_ID: u32 = 15;

pub(crate) fn rand_u64() -> u64 {
    rand::random::<u64>()
}

/// One reply-cache slot.
pub struct Slot {
    pub slot_id: u32,
    pub sequence_id: u32,
    pub contains_data: bool,
    /// Present on persistent sessions: holds the encoded bytes of the last
    /// cached reply so a retransmission is served without re-execution.
    pub buf: Option<Buf>,
}

type Session = Vec<Slot>;

struct Client {
    name: Vec<u8>,
    verifier: u64,
    creds: Creds,

    last_seen: SystemTime,
    confirmed: bool,
    confirm_value: u64,
    seq_id: u32,
    busy: u64,

    sessions: HashMap<u64, Session>,
}

/// Outcome of the slot check at the head of a sessioned COMPOUND.
#[derive(Debug, PartialEq, Eq)]
pub enum SlotCheck {
    /// Same sequence id, cached bytes available: the reply was copied to
    /// the output buffer, nothing executes.
    Replay,
    /// Same sequence id but nothing cached (`NFS4ERR_RETRY_UNCACHED_REP`).
    RetryUncached,
    /// Sequence id neither current nor current+1 (`NFS4ERR_SEQ_MISORDERED`).
    Misordered,
    /// The slot advanced; execute the compound. `cache` says whether to
    /// store the finished reply via [`Clients::slot_store`].
    Execute { cache: bool },
}

/// The registry of known clients.
#[derive(Default)]
pub struct Clients {
    clients: Mutex<HashMap<u64, Client>>,
}

impl Clients {
    pub fn new() -> Arc<Self> {
        Arc::new(Clients::default())
    }

    /// Runs the expiration sweep every half window until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let clients = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLIENT_EXPIRATION / 2);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        clients.remove_expired(CLIENT_EXPIRATION);
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    /// Registers a client, used by SETCLIENTID and EXCHANGE_ID. A confirmed
    /// client re-registering under the same name with the same verifier is
    /// refreshed in place (new confirm value, bumped sequence id); the same
    /// name under different credentials is refused; otherwise a new
    /// unconfirmed record replaces any stale unconfirmed ones of that name.
    pub fn add(
        &self,
        name: &[u8],
        verifier: u64,
        creds: &Creds,
    ) -> Result<(u64, u64, u32), nfsstat4> {
        let mut clients = self.lock();

        let mut matching: Vec<u64> = Vec::new();

        for (id, stored) in clients.iter() {
            if !stored.confirmed || stored.name != name {
                continue;
            }
            if !stored.creds.equal(creds) {
                return Err(nfsstat4::NFS4ERR_CLID_INUSE);
            }
            matching.push(*id);
        }

        for id in matching {
            let stored = clients.get_mut(&id).expect("id collected under the same lock");
            if stored.verifier != verifier {
                continue;
            }

            // An update of the current client.
            stored.confirm_value = rand_u64();
            stored.seq_id += 1;
            stored.last_seen = clock::now();

            return Ok((id, stored.confirm_value, stored.seq_id));
        }

        let mut id = rand_u64();
        while clients.contains_key(&id) {
            id = rand_u64();
        }

        clients.retain(|_, stored| stored.confirmed || stored.name != name);

        let client = Client {
            name: name.to_vec(),
            verifier,
            creds: creds.clone(),
            last_seen: clock::now(),
            confirmed: false,
            confirm_value: rand_u64(),
            seq_id: 1,
            busy: 0,
            sessions: HashMap::new(),
        };

        let result = (id, client.confirm_value, client.seq_id);
        clients.insert(id, client);

        Ok(result)
    }

    /// Confirms a client, used by SETCLIENTID_CONFIRM.
    pub fn confirm(
        &self,
        client_id: u64,
        confirm_value: u64,
        creds: &Creds,
    ) -> Result<(), nfsstat4> {
        let mut clients = self.lock();

        let client = clients
            .get_mut(&client_id)
            .filter(|c| c.confirm_value == confirm_value)
            .ok_or(nfsstat4::NFS4ERR_STALE_CLIENTID)?;

        if !client.creds.equal(creds) {
            return Err(nfsstat4::NFS4ERR_CLID_INUSE);
        }

        client.confirmed = true;
        client.last_seen = clock::now();

        Ok(())
    }

    /// Confirms a client against the CREATE_SESSION sequence id. An already
    /// confirmed client may replay the current sequence id or advance it;
    /// going backwards is misordered. An unconfirmed client must present
    /// the exact sequence id and matching credentials.
    pub fn confirm41(&self, client_id: u64, seq_id: u32, creds: &Creds) -> Result<(), nfsstat4> {
        let mut clients = self.lock();

        let client = clients.get_mut(&client_id).ok_or(nfsstat4::NFS4ERR_STALE_CLIENTID)?;

        if client.confirmed {
            if seq_id == 0 && client.seq_id != 0 {
                // First session after confirmation via EXCHANGE_ID refresh.
                client.last_seen = clock::now();
                client.seq_id = 0;
                return Ok(());
            }

            if seq_id < client.seq_id {
                return Err(nfsstat4::NFS4ERR_SEQ_MISORDERED);
            }

            if seq_id == client.seq_id {
                // Replay of the previous CREATE_SESSION.
                return Ok(());
            }

            client.last_seen = clock::now();
            client.seq_id = seq_id;

            return Ok(());
        }

        if client.seq_id != seq_id {
            return Err(nfsstat4::NFS4ERR_STALE_CLIENTID);
        }

        if !client.creds.equal(creds) {
            return Err(nfsstat4::NFS4ERR_CLID_INUSE);
        }

        client.confirmed = true;
        client.last_seen = clock::now();

        Ok(())
    }

    /// Looks up a confirmed client and touches its lease. Returns the
    /// stored credentials so callers can check ownership.
    pub fn get(&self, client_id: u64) -> Option<Creds> {
        let mut clients = self.lock();

        let client = clients.get_mut(&client_id).filter(|c| c.confirmed)?;
        client.last_seen = clock::now();

        Some(client.creds.clone())
    }

    /// Finds a confirmed client by name, verifier and credentials; the
    /// EXCHANGE_ID fast path.
    pub fn get_by_name(&self, name: &[u8], verifier: u64, creds: &Creds) -> Option<u64> {
        let mut clients = self.lock();

        for (id, client) in clients.iter_mut() {
            if client.name != name
                || client.verifier != verifier
                || !client.confirmed
                || !client.creds.equal(creds)
            {
                continue;
            }

            client.last_seen = clock::now();
            return Some(*id);
        }

        None
    }

    /// Removes a confirmed, idle client (DESTROY_CLIENTID).
    pub fn remove_client(&self, client_id: u64) -> Result<(), nfsstat4> {
        let mut clients = self.lock();

        let client = clients
            .get(&client_id)
            .filter(|c| c.confirmed)
            .ok_or(nfsstat4::NFS4ERR_STALE_CLIENTID)?;

        if client.busy > 0 {
            return Err(nfsstat4::NFS4ERR_CLIENTID_BUSY);
        }

        let client = clients.remove(&client_id).expect("present under the same lock");
        release_session_buffers(client.sessions);

        Ok(())
    }

    /// Creates a session for a confirmed client: a fresh cache id, sixteen
    /// slots, and per-slot reply buffers when `persist` is set. Returns the
    /// composite session id.
    pub fn build_session(&self, client_id: u64, persist: bool) -> Option<[u8; 16]> {
        let mut clients = self.lock();

        let client = clients.get_mut(&client_id)?;

        let mut cache_id = rand_u64();
        while client.sessions.contains_key(&cache_id) {
            cache_id = rand_u64();
        }

        let slots = (0..=MAX_SLOT_ID)
            .map(|slot_id| Slot {
                slot_id,
                sequence_id: 0,
                contains_data: false,
                buf: persist.then(bufpool::get),
            })
            .collect();

        client.sessions.insert(cache_id, slots);

        let mut session_id = [0_u8; 16];
        session_id[..8].copy_from_slice(&client_id.to_be_bytes());
        session_id[8..].copy_from_slice(&cache_id.to_be_bytes());

        Some(session_id)
    }

    /// Tears down a session, returning its reply buffers to the pool.
    pub fn remove_session(&self, session_id: [u8; 16]) {
        let mut clients = self.lock();

        let Some(client) = clients.get_mut(&client_id_from_session_id(session_id)) else {
            return;
        };

        if let Some(slots) = client.sessions.remove(&cache_id_from_session_id(session_id)) {
            for slot in slots {
                if let Some(buf) = slot.buf {
                    bufpool::put(buf);
                }
            }
        }
    }

    /// Classifies an incoming SEQUENCE against its slot and advances the
    /// slot when the compound should execute. On a replay the cached bytes
    /// are copied into `out` under the registry lock.
    pub fn slot_begin(
        &self,
        session_id: [u8; 16],
        slot_id: u32,
        sequence_id: u32,
        cache_this: bool,
        out: &mut Buf,
    ) -> Result<SlotCheck, nfsstat4> {
        let mut clients = self.lock();

        let client = clients
            .get_mut(&client_id_from_session_id(session_id))
            .filter(|c| c.confirmed)
            .ok_or(nfsstat4::NFS4ERR_DEADSESSION)?;

        client.last_seen = clock::now();

        let slot = client
            .sessions
            .get_mut(&cache_id_from_session_id(session_id))
            .and_then(|slots| slots.get_mut(slot_id as usize))
            .ok_or(nfsstat4::NFS4ERR_DEADSESSION)?;

        if slot.sequence_id == sequence_id && slot.contains_data {
            let cached = slot.buf.as_ref().expect("contains_data implies a buffer");
            cached.copy_to(out);
            return Ok(SlotCheck::Replay);
        }

        if slot.sequence_id == sequence_id && slot.buf.is_none() {
            // The client asks for cached data on a non-persistent session.
            return Ok(SlotCheck::RetryUncached);
        }

        if slot.sequence_id != sequence_id && slot.sequence_id.wrapping_add(1) != sequence_id {
            return Ok(SlotCheck::Misordered);
        }

        slot.sequence_id = sequence_id;
        slot.contains_data = cache_this && slot.buf.is_some();

        Ok(SlotCheck::Execute { cache: slot.contains_data })
    }

    /// Stores the finished reply in the slot buffer for future replays.
    pub fn slot_store(&self, session_id: [u8; 16], slot_id: u32, reply: &Buf) {
        let mut clients = self.lock();

        let Some(slot) = clients
            .get_mut(&client_id_from_session_id(session_id))
            .and_then(|c| c.sessions.get_mut(&cache_id_from_session_id(session_id)))
            .and_then(|slots| slots.get_mut(slot_id as usize))
        else {
            return;
        };

        if let Some(buf) = slot.buf.as_mut() {
            buf.reset();
            reply.copy_to(buf);
        }
    }

    /// Marks that `n` more open files reference this client.
    pub fn add_busy(&self, client_id: u64, n: u64) {
        if let Some(client) = self.lock().get_mut(&client_id) {
            client.busy += n;
        }
    }

    /// Drops one open-file reference.
    pub fn done(&self, client_id: u64) {
        if let Some(client) = self.lock().get_mut(&client_id) {
            client.busy = client.busy.saturating_sub(1);
        }
    }

    /// Removes clients not seen within `expiration` that have no open
    /// files, releasing their session buffers. Returns the removed ids.
    pub fn remove_expired(&self, expiration: Duration) -> Vec<u64> {
        let mut clients = self.lock();
        let now = clock::now();

        let expired: Vec<u64> = clients
            .iter()
            .filter(|(_, c)| {
                c.busy == 0
                    && now.duration_since(c.last_seen).unwrap_or_default() > expiration
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(client) = clients.remove(id) {
                info!("removing expired client {id}: {}", client.creds.hostname);
                release_session_buffers(client.sessions);
            }
        }

        expired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Client>> {
        match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("client registry mutex poisoned");
                poisoned.into_inner()
            }
        }
    }
}

fn release_session_buffers(sessions: HashMap<u64, Session>) {
    for (_, slots) in sessions {
        for slot in slots {
            if let Some(buf) = slot.buf {
                bufpool::put(buf);
            }
        }
    }
}

/// The upper eight bytes of a session id are the owning client id.
pub fn client_id_from_session_id(session_id: [u8; 16]) -> u64 {
    u64::from_be_bytes(session_id[..8].try_into().expect("8-byte slice"))
}

/// The lower eight bytes of a session id are the cache id.
pub fn cache_id_from_session_id(session_id: [u8; 16]) -> u64 {
    u64::from_be_bytes(session_id[8..].try_into().expect("8-byte slice"))
}
