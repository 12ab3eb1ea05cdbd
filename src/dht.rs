use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use futures::StreamExt as _;
use libp2p::kad::{
    self, store::MemoryStore, Behaviour as Kademlia, Config as KademliaConfig,
    Event as KademliaEvent, GetRecordOk, Mode, PutRecordOk, QueryId, QueryResult, Quorum, Record,
    RecordKey,
};
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, identity, noise, tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::catalog::CatalogStore;
use crate::config::SilmarilConfig;
use crate::error::SilmarilError;
use crate::session::TorrentSessionManager;
use crate::state::StateStore;

const EXPECTED_PROTOCOL_VERSION: &str = "/silmaril/1.0.0";
const KAD_PROTOCOL: &str = "/silmaril/kad/1.0.0";
const BOOTSTRAP_BUDGET: Duration = Duration::from_secs(30);
const PERIODIC_REBOOTSTRAP: Duration = Duration::from_secs(15 * 60);
const ANNOUNCEMENT_STALE_AFTER: Duration = Duration::from_secs(25 * 60);
const ANNOUNCEMENT_REFRESH_TICK: Duration = Duration::from_secs(60);
const SEEDED_REFRESH_INITIAL_DELAY: Duration = Duration::from_secs(2 * 60);
const SEEDED_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Bytes of the compiled-in well-known catalog keypair (§4.E). Fixed so
/// every daemon can both publish and verify the BEP44 mutable item for the
/// shared catalog slot.
const WELL_KNOWN_CATALOG_SEED: [u8; 32] = [
    0x53, 0x69, 0x6c, 0x6d, 0x61, 0x72, 0x69, 0x6c, 0x2d, 0x63, 0x61, 0x74, 0x61, 0x6c, 0x6f, 0x67,
    0x2d, 0x6b, 0x65, 0x79, 0x2d, 0x76, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
];

fn well_known_signing_key() -> SigningKey {
    SigningKey::from_bytes(&WELL_KNOWN_CATALOG_SEED)
}

fn well_known_record_key() -> RecordKey {
    let verifying_key = well_known_signing_key().verifying_key();
    let digest = Sha256::digest(verifying_key.as_bytes());
    RecordKey::new(&digest.as_slice())
}

/// The BEP44 mutable-item value published at the well-known key (§4.E,
/// §4.F). `catalog_infohash` is the current catalog torrent's infohash, not
/// the DHT record key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogReference {
    pub infohash: String,
    pub sequence: u64,
    pub updated: i64,
    pub size: Option<u64>,
    pub seeder_count: Option<u32>,
}

/// A BEP44 record laid directly on top of libp2p kad's generic
/// signed-opaque-value primitive: `seq` plus a detached ed25519 signature
/// over `seq || value` (§4.F BEP44 layering note).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedEnvelope {
    seq: u64,
    value: Vec<u8>,
    #[serde(
        serialize_with = "serialize_signature",
        deserialize_with = "deserialize_signature"
    )]
    signature: [u8; 64],
}

fn serialize_signature<S: serde::Serializer>(
    signature: &[u8; 64],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(signature))
}

fn deserialize_signature<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<[u8; 64], D::Error> {
    let encoded = String::deserialize(deserializer)?;
    let bytes = hex::decode(&encoded).map_err(serde::de::Error::custom)?;
    bytes
        .try_into()
        .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))
}

impl SignedEnvelope {
    fn sign(signing_key: &SigningKey, seq: u64, value: Vec<u8>) -> Self {
        let signature = signing_key.sign(&canonical_signing_bytes(seq, &value));
        Self {
            seq,
            value,
            signature: signature.to_bytes(),
        }
    }

    fn verify(&self, verifying_key: &VerifyingKey) -> crate::error::Result<()> {
        let signature = Signature::from_bytes(&self.signature);
        verifying_key
            .verify(&canonical_signing_bytes(self.seq, &self.value), &signature)
            .map_err(|e| SilmarilError::SignatureMismatch(format!("catalog reference signature invalid: {e}")))
    }
}

fn canonical_signing_bytes(seq: u64, value: &[u8]) -> Vec<u8> {
    let mut bytes = seq.to_be_bytes().to_vec();
    bytes.extend_from_slice(value);
    bytes
}

#[derive(NetworkBehaviour)]
struct DhtBehaviour {
    kademlia: Kademlia<MemoryStore>,
    identify: identify::Behaviour,
}

struct Announcement {
    name: String,
    infohash: String,
    size: u64,
    announced_at: std::time::Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DhtStats {
    pub node_count: usize,
    pub good_node_count: usize,
    pub announcement_count: usize,
    pub last_refresh: Option<i64>,
}

enum DhtCommand {
    AnnounceModel {
        name: String,
        infohash: String,
        size: u64,
        reply: oneshot::Sender<crate::error::Result<()>>,
    },
    Discover {
        pattern: String,
        reply: oneshot::Sender<Vec<(String, crate::catalog::CatalogEntry)>>,
    },
    GetStats(oneshot::Sender<DhtStats>),
    RefreshAnnouncements(oneshot::Sender<()>),
    RepublishCatalog(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub enum DhtEvent {
    Bootstrapped,
    CatalogRepublished { sequence: u64 },
    Error(String),
}

/// Owns one Kademlia DHT node and layers BEP44 mutable-item semantics over
/// it for the shared catalog slot (§4.F).
pub struct DhtManager {
    cmd_tx: mpsc::Sender<DhtCommand>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<DhtEvent>>,
    peer_id: PeerId,
}

impl DhtManager {
    pub async fn new(
        config: &SilmarilConfig,
        catalog: Arc<CatalogStore>,
        session: Arc<TorrentSessionManager>,
        state: Arc<StateStore>,
    ) -> crate::error::Result<Self> {
        let local_key = identity::Keypair::generate_ed25519();
        let peer_id = PeerId::from(local_key.public());
        info!(peer_id = %peer_id, "local DHT node id");

        let store = MemoryStore::new(peer_id);
        let mut kad_cfg = KademliaConfig::new(libp2p::StreamProtocol::new(KAD_PROTOCOL));
        kad_cfg.set_query_timeout(Duration::from_secs(30));
        if let Some(replication) = std::num::NonZeroUsize::new(3) {
            kad_cfg.set_replication_factor(replication);
        }
        let mut kademlia = Kademlia::with_config(peer_id, store, kad_cfg);
        kademlia.set_mode(Some(Mode::Server));

        let identify = identify::Behaviour::new(
            identify::Config::new(EXPECTED_PROTOCOL_VERSION.to_string(), local_key.public())
                .with_agent_version(format!("silmaril/{}", env!("CARGO_PKG_VERSION"))),
        );

        let behaviour = DhtBehaviour { kademlia, identify };

        let mut swarm = SwarmBuilder::with_existing_identity(local_key)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| SilmarilError::Fatal(format!("failed to build transport: {e}")))?
            .with_behaviour(|_| behaviour)
            .map_err(|e| SilmarilError::Fatal(format!("failed to build behaviour: {e}")))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
            .build();

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.dht_port)
            .parse()
            .map_err(|e| SilmarilError::Fatal(format!("invalid listen address: {e}")))?;
        match swarm.listen_on(listen_addr) {
            Ok(_) => info!(port = config.dht_port, "DHT listening"),
            Err(e) => {
                warn!(error = %e, "failed to bind configured DHT port, falling back to an OS-chosen port");
                let fallback: Multiaddr = "/ip4/0.0.0.0/tcp/0"
                    .parse()
                    .expect("static multiaddr is valid");
                swarm
                    .listen_on(fallback)
                    .map_err(|e| SilmarilError::Fatal(format!("failed to bind fallback DHT port: {e}")))?;
            }
        }

        let bootstrap_nodes = config.bootstrap_nodes.clone();
        let mut dialed_any = false;
        for addr in &bootstrap_nodes {
            match addr.parse::<Multiaddr>() {
                Ok(multiaddr) => {
                    if swarm.dial(multiaddr.clone()).is_ok() {
                        dialed_any = true;
                        if let Some(libp2p::multiaddr::Protocol::P2p(peer)) =
                            multiaddr.iter().find(|p| matches!(p, libp2p::multiaddr::Protocol::P2p(_)))
                        {
                            swarm.behaviour_mut().kademlia.add_address(&peer, multiaddr);
                        }
                    }
                }
                Err(e) => warn!(address = %addr, error = %e, "invalid bootstrap address"),
            }
        }
        if !dialed_any && !bootstrap_nodes.is_empty() {
            warn!("no configured bootstrap node was reachable; relying on the library's global bootstrap addresses");
        }
        let _ = swarm.behaviour_mut().kademlia.bootstrap();

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        tokio::spawn(run_dht_loop(swarm, cmd_rx, event_tx, catalog, session, state));

        Ok(Self {
            cmd_tx,
            event_rx: tokio::sync::Mutex::new(event_rx),
            peer_id,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// `AnnounceModel(announcement)` (§4.F): records the announcement and
    /// forwards it to the catalog reference as `AddModel`.
    pub async fn announce_model(&self, name: String, infohash: String, size: u64) -> crate::error::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(DhtCommand::AnnounceModel {
                name,
                infohash,
                size,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SilmarilError::Fatal("DHT manager loop is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SilmarilError::Fatal("DHT manager loop dropped the reply channel".to_string()))?
    }

    /// `Discover(pattern)` (§4.F): consults the local catalog reference.
    pub async fn discover(&self, pattern: &str) -> Vec<(String, crate::catalog::CatalogEntry)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(DhtCommand::Discover {
                pattern: pattern.to_string(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn stats(&self) -> DhtStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(DhtCommand::GetStats(reply_tx)).await.is_err() {
            return DhtStats::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// `RefreshAnnouncements()` (§4.I supervisor worker table): forces an
    /// immediate republish of every tracked announcement, independent of
    /// the internal staleness-driven ticker.
    pub async fn refresh_announcements(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(DhtCommand::RefreshAnnouncements(reply_tx))
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Forces an immediate catalog-torrent rebuild and reference republish,
    /// independent of the announcement map (§4.I catalog-refresh worker).
    pub async fn republish_catalog(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(DhtCommand::RepublishCatalog(reply_tx))
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Bounded drain of lifecycle events, mirroring the transfer manager's
    /// `drain_events` idiom (§10.4).
    pub async fn drain_events(&self, max: usize) -> Vec<DhtEvent> {
        let mut rx = self.event_rx.lock().await;
        let mut out = Vec::new();
        while out.len() < max {
            match rx.try_recv() {
                Ok(event) => out.push(event),
                Err(_) => break,
            }
        }
        out
    }

    /// Shutdown (§4.F): best-effort final catalog republish, then close the
    /// socket by dropping the background task.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(DhtCommand::Shutdown(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

type DiscoverReply = oneshot::Sender<Vec<(String, crate::catalog::CatalogEntry)>>;

async fn run_dht_loop(
    mut swarm: Swarm<DhtBehaviour>,
    mut cmd_rx: mpsc::Receiver<DhtCommand>,
    event_tx: mpsc::Sender<DhtEvent>,
    catalog: Arc<CatalogStore>,
    session: Arc<TorrentSessionManager>,
    state: Arc<StateStore>,
) {
    let signing_key = well_known_signing_key();
    let verifying_key = signing_key.verifying_key();
    let record_key = well_known_record_key();

    let announcements: RwLock<HashMap<String, Announcement>> = RwLock::new(HashMap::new());
    let highest_seen_seq = std::sync::atomic::AtomicU64::new(0);
    let mut pending_gets: HashMap<QueryId, ()> = HashMap::new();
    let mut pending_discovers: HashMap<QueryId, (String, DiscoverReply)> = HashMap::new();
    let mut pending_puts: HashMap<QueryId, u64> = HashMap::new();
    let mut stats = DhtStats::default();
    let started_at = std::time::Instant::now();

    let mut rebootstrap = interval(PERIODIC_REBOOTSTRAP);
    rebootstrap.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut announcement_refresh = interval(ANNOUNCEMENT_REFRESH_TICK);
    announcement_refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seeded_refresh = tokio::time::interval_at(
        tokio::time::Instant::now() + SEEDED_REFRESH_INITIAL_DELAY,
        SEEDED_REFRESH_INTERVAL,
    );
    seeded_refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut random_announces_remaining = 3u8;
    let mut bootstrap_deadline = tokio::time::Instant::now() + BOOTSTRAP_BUDGET;

    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                match event {
                    SwarmEvent::Behaviour(DhtBehaviourEvent::Kademlia(KademliaEvent::OutboundQueryProgressed { id, result, .. })) => {
                        match result {
                            QueryResult::GetRecord(Ok(GetRecordOk::FoundRecord(found))) => {
                                pending_gets.remove(&id);
                                let mut reference: Option<CatalogReference> = None;
                                if let Ok(envelope) = serde_json::from_slice::<SignedEnvelope>(&found.record.value) {
                                    if envelope.verify(&verifying_key).is_ok() {
                                        let current = highest_seen_seq.load(std::sync::atomic::Ordering::SeqCst);
                                        if envelope.seq > current {
                                            highest_seen_seq.store(envelope.seq, std::sync::atomic::Ordering::SeqCst);
                                        }
                                        if let Ok(parsed) = serde_json::from_slice::<CatalogReference>(&envelope.value) {
                                            debug!(infohash = %parsed.infohash, seq = envelope.seq, "observed catalog reference");
                                            reference = Some(parsed);
                                        }
                                    }
                                }

                                if let Some((pattern, reply)) = pending_discovers.remove(&id) {
                                    if let Some(reference) = &reference {
                                        let local_sequence = catalog.snapshot().await.sequence;
                                        if reference.sequence > local_sequence && !reference.infohash.is_empty() {
                                            if let Err(e) = catalog.load_or_fetch(&reference.infohash, &session, &state).await {
                                                warn!(error = %e, infohash = %reference.infohash, "failed to load fresher catalog torrent");
                                            }
                                        }
                                    }
                                    let matches = catalog.get_models(&pattern).await;
                                    let _ = reply.send(matches);
                                }
                            }
                            QueryResult::GetRecord(Err(e)) => {
                                pending_gets.remove(&id);
                                debug!(error = ?e, "get_record query failed");
                                if let Some((pattern, reply)) = pending_discovers.remove(&id) {
                                    let matches = catalog.get_models(&pattern).await;
                                    let _ = reply.send(matches);
                                }
                            }
                            QueryResult::PutRecord(Ok(PutRecordOk { .. })) => {
                                if let Some(seq) = pending_puts.remove(&id) {
                                    stats.last_refresh = Some(chrono::Utc::now().timestamp());
                                    let _ = event_tx.send(DhtEvent::CatalogRepublished { sequence: seq }).await;
                                }
                            }
                            QueryResult::PutRecord(Err(e)) => {
                                pending_puts.remove(&id);
                                let _ = event_tx.send(DhtEvent::Error(format!("catalog republish failed: {e}"))).await;
                            }
                            QueryResult::Bootstrap(Ok(_)) => {
                                if random_announces_remaining > 0 && started_at.elapsed() < BOOTSTRAP_BUDGET {
                                    random_announces_remaining -= 1;
                                    let random_key = RecordKey::new(&rand::thread_rng().gen::<[u8; 20]>());
                                    swarm.behaviour_mut().kademlia.get_record(random_key);
                                } else if random_announces_remaining == 3 {
                                    let _ = event_tx.send(DhtEvent::Bootstrapped).await;
                                }
                            }
                            _ => {}
                        }
                    }
                    SwarmEvent::Behaviour(DhtBehaviourEvent::Identify(identify::Event::Received { peer_id, .. })) => {
                        swarm.behaviour_mut().kademlia.add_address(&peer_id, Multiaddr::empty());
                    }
                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!(%address, "DHT listening on new address");
                    }
                    _ => {}
                }
            }

            _ = tokio::time::sleep_until(bootstrap_deadline) => {
                let _ = swarm.behaviour_mut().kademlia.bootstrap();
                bootstrap_deadline = tokio::time::Instant::now() + PERIODIC_REBOOTSTRAP;
            }

            _ = rebootstrap.tick() => {
                let _ = swarm.behaviour_mut().kademlia.bootstrap();
            }

            _ = announcement_refresh.tick() => {
                let stale: Vec<(String, String, u64)> = {
                    let guard = announcements.read().await;
                    guard
                        .values()
                        .filter(|a| a.announced_at.elapsed() > ANNOUNCEMENT_STALE_AFTER)
                        .map(|a| (a.name.clone(), a.infohash.clone(), a.size))
                        .collect()
                };
                for (name, infohash, size) in stale {
                    if let Ok(sequence) = catalog.add_model(&name, infohash, size).await {
                        republish_catalog_reference(&mut swarm, &catalog, &session, &state, &signing_key, &record_key, sequence, &mut pending_puts).await;
                    }
                    let mut guard = announcements.write().await;
                    if let Some(entry) = guard.get_mut(&name) {
                        entry.announced_at = std::time::Instant::now();
                    }
                }
            }

            _ = seeded_refresh.tick() => {
                let seeded = catalog.snapshot().await;
                for (name, entry) in seeded.models {
                    if let Ok(sequence) = catalog.add_model(&name, entry.infohash, entry.size).await {
                        republish_catalog_reference(&mut swarm, &catalog, &session, &state, &signing_key, &record_key, sequence, &mut pending_puts).await;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(DhtCommand::AnnounceModel { name, infohash, size, reply }) => {
                        let result = catalog.add_model(&name, infohash.clone(), size).await;
                        match result {
                            Ok(sequence) => {
                                announcements.write().await.insert(
                                    name.clone(),
                                    Announcement { name, infohash, size, announced_at: std::time::Instant::now() },
                                );
                                stats.announcement_count = announcements.read().await.len();
                                republish_catalog_reference(&mut swarm, &catalog, &session, &state, &signing_key, &record_key, sequence, &mut pending_puts).await;
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(DhtCommand::Discover { pattern, reply }) => {
                        let query_id = swarm.behaviour_mut().kademlia.get_record(record_key.clone());
                        pending_discovers.insert(query_id, (pattern, reply));
                    }
                    Some(DhtCommand::GetStats(reply)) => {
                        stats.node_count = swarm.behaviour_mut().kademlia.kbuckets().map(|b| b.num_entries()).sum();
                        stats.good_node_count = stats.node_count;
                        let _ = reply.send(stats.clone());
                    }
                    Some(DhtCommand::RefreshAnnouncements(reply)) => {
                        let all: Vec<(String, String, u64)> = {
                            let guard = announcements.read().await;
                            guard.values().map(|a| (a.name.clone(), a.infohash.clone(), a.size)).collect()
                        };
                        for (name, infohash, size) in all {
                            if let Ok(sequence) = catalog.add_model(&name, infohash, size).await {
                                republish_catalog_reference(&mut swarm, &catalog, &session, &state, &signing_key, &record_key, sequence, &mut pending_puts).await;
                            }
                            let mut guard = announcements.write().await;
                            if let Some(entry) = guard.get_mut(&name) {
                                entry.announced_at = std::time::Instant::now();
                            }
                        }
                        let _ = reply.send(());
                    }
                    Some(DhtCommand::RepublishCatalog(reply)) => {
                        let sequence = catalog.snapshot().await.sequence;
                        republish_catalog_reference(&mut swarm, &catalog, &session, &state, &signing_key, &record_key, sequence, &mut pending_puts).await;
                        let _ = reply.send(());
                    }
                    Some(DhtCommand::Shutdown(ack)) => {
                        let current = catalog.snapshot().await;
                        republish_catalog_reference(&mut swarm, &catalog, &session, &state, &signing_key, &record_key, current.sequence, &mut pending_puts).await;
                        let _ = ack.send(());
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

async fn republish_catalog_reference(
    swarm: &mut Swarm<DhtBehaviour>,
    catalog: &Arc<CatalogStore>,
    session: &Arc<TorrentSessionManager>,
    state: &Arc<StateStore>,
    signing_key: &SigningKey,
    record_key: &RecordKey,
    sequence: u64,
    pending_puts: &mut HashMap<QueryId, u64>,
) {
    let infohash = match catalog.rebuild_and_seed_torrent(session, state).await {
        Ok(infohash) => infohash,
        Err(e) => {
            warn!(error = %e, "failed to rebuild catalog torrent, skipping reference republish");
            return;
        }
    };
    let snapshot = catalog.snapshot().await;
    let reference = CatalogReference {
        infohash,
        sequence: snapshot.sequence,
        updated: snapshot.updated,
        size: None,
        seeder_count: None,
    };
    let Ok(value) = serde_json::to_vec(&reference) else {
        return;
    };
    let envelope = SignedEnvelope::sign(signing_key, sequence, value);
    let Ok(record_value) = serde_json::to_vec(&envelope) else {
        return;
    };
    let record = Record {
        key: record_key.clone(),
        value: record_value,
        publisher: None,
        expires: None,
    };
    match swarm.behaviour_mut().kademlia.put_record(record, Quorum::One) {
        Ok(query_id) => {
            pending_puts.insert(query_id, sequence);
        }
        Err(e) => warn!(error = %e, "failed to publish catalog reference"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_key_derivation_is_deterministic() {
        assert_eq!(well_known_record_key(), well_known_record_key());
    }

    #[test]
    fn signed_envelope_round_trips() {
        let key = well_known_signing_key();
        let envelope = SignedEnvelope::sign(&key, 5, b"hello".to_vec());
        envelope.verify(&key.verifying_key()).unwrap();
    }

    #[test]
    fn signed_envelope_rejects_tampered_value() {
        let key = well_known_signing_key();
        let mut envelope = SignedEnvelope::sign(&key, 5, b"hello".to_vec());
        envelope.value = b"tampered".to_vec();
        assert!(envelope.verify(&key.verifying_key()).is_err());
    }

    #[test]
    fn canonical_reference_serializes_without_panicking() {
        let reference = CatalogReference {
            infohash: "a".repeat(40),
            sequence: 1,
            updated: 0,
            size: Some(10),
            seeder_count: None,
        };
        serde_json::to_vec(&reference).unwrap();
    }
}
