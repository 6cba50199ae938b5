use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mpd_jukebox::{
    Catalog, CatalogError, MpdClient, PersistedState, Player, PlayerEvent, StateStore, StoreError,
    Track, TrackId,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};

fn track(id: TrackId, name: &str) -> Track {
    Track {
        id,
        title: name.to_string(),
        external_id: format!("yt:{}", name),
        extension: ".mp3".to_string(),
    }
}

fn test_client(port: u16) -> MpdClient {
    MpdClient::with_timeouts(
        "127.0.0.1",
        port,
        Duration::from_secs(2),
        Duration::from_secs(60),
    )
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// --- In-memory daemon speaking just enough of the line protocol ---

struct DaemonState {
    // (daemon-side song id, locator), front of the Vec is the current track
    playlist: Vec<(u32, String)>,
    next_song_id: u32,
    playing: bool,
    // Every locator ever accepted by addid, in arrival order
    added: Vec<String>,
    // Locators rejected with ACK 50, simulating unindexed files
    reject: HashSet<String>,
}

struct FakeDaemon {
    state: Mutex<DaemonState>,
    version_tx: watch::Sender<u64>,
    port: u16,
}

impl FakeDaemon {
    async fn start(reject: HashSet<String>) -> Arc<FakeDaemon> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (version_tx, _) = watch::channel(0u64);

        let daemon = Arc::new(FakeDaemon {
            state: Mutex::new(DaemonState {
                playlist: Vec::new(),
                next_song_id: 1,
                playing: false,
                added: Vec::new(),
                reject,
            }),
            version_tx,
            port,
        });

        let accept_daemon = daemon.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let daemon = accept_daemon.clone();
                tokio::spawn(async move { daemon.serve(socket).await });
            }
        });

        daemon
    }

    async fn added(&self) -> Vec<String> {
        self.state.lock().await.added.clone()
    }

    fn bump_version(&self) {
        self.version_tx.send_modify(|v| *v += 1);
    }

    async fn serve(self: Arc<Self>, socket: TcpStream) {
        let (read_half, mut writer) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut version_rx = self.version_tx.subscribe();
        // Changes made before this connection existed are invisible to it
        let mut seen_version = *version_rx.borrow_and_update();

        if writer.write_all(b"OK MPD 0.23.5\n").await.is_err() {
            return;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            let reply = if line == "status" {
                let state = self.state.lock().await;
                let mut reply = format!(
                    "volume: 100\nplaylistlength: {}\nstate: {}\n",
                    state.playlist.len(),
                    if state.playing { "play" } else { "stop" },
                );
                if let Some((song_id, _)) = state.playlist.first() {
                    reply.push_str(&format!("songid: {}\n", song_id));
                }
                if let Some((song_id, _)) = state.playlist.get(1) {
                    reply.push_str(&format!("nextsongid: {}\n", song_id));
                }
                reply.push_str("OK\n");
                reply
            } else if let Some(locator) = line.strip_prefix("addid ") {
                let mut state = self.state.lock().await;
                if state.reject.contains(locator) {
                    "ACK [50@0] {addid} No such song\n".to_string()
                } else {
                    let song_id = state.next_song_id;
                    state.next_song_id += 1;
                    state.playlist.push((song_id, locator.to_string()));
                    state.added.push(locator.to_string());
                    drop(state);
                    self.bump_version();
                    format!("Id: {}\nOK\n", song_id)
                }
            } else if line == "play" {
                self.state.lock().await.playing = true;
                self.bump_version();
                "OK\n".to_string()
            } else if let Some(id) = line.strip_prefix("playlistid ") {
                let wanted: u32 = id.parse().unwrap();
                let state = self.state.lock().await;
                match state.playlist.iter().find(|(song_id, _)| *song_id == wanted) {
                    Some((_, locator)) => format!("file: {}\nOK\n", locator),
                    None => "ACK [50@0] {playlistid} No such song\n".to_string(),
                }
            } else if line == "idle" || line.starts_with("idle ") {
                let mut reply = None;
                while reply.is_none() {
                    let version = *version_rx.borrow_and_update();
                    if version > seen_version {
                        seen_version = version;
                        reply = Some("changed: playlist\nOK\n".to_string());
                        break;
                    }
                    tokio::select! {
                        changed = version_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        cancel = lines.next_line() => {
                            match cancel {
                                Ok(Some(cancel)) if cancel == "noidle" => {
                                    reply = Some("OK\n".to_string());
                                }
                                _ => return,
                            }
                        }
                    }
                }
                reply.unwrap()
            } else {
                // random / repeat / single / consume and the rest
                "OK\n".to_string()
            };

            if writer.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

// --- In-memory catalog and state store ---

#[derive(Clone)]
struct MemoryCatalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    tracks: Mutex<HashMap<TrackId, Track>>,
    deleted: Mutex<Vec<TrackId>>,
}

impl MemoryCatalog {
    fn new(tracks: Vec<Track>) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                tracks: Mutex::new(tracks.into_iter().map(|t| (t.id, t)).collect()),
                deleted: Mutex::new(Vec::new()),
            }),
        }
    }

    async fn add(&self, track: Track) {
        self.inner.tracks.lock().await.insert(track.id, track);
    }

    async fn deleted_ids(&self) -> Vec<TrackId> {
        self.inner.deleted.lock().await.clone()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get(&self, id: TrackId) -> Result<Option<Track>, CatalogError> {
        Ok(self.inner.tracks.lock().await.get(&id).cloned())
    }

    async fn find(
        &self,
        external_id: &str,
        extension: &str,
    ) -> Result<Option<Track>, CatalogError> {
        Ok(self
            .inner
            .tracks
            .lock()
            .await
            .values()
            .find(|t| t.external_id == external_id && t.extension == extension)
            .cloned())
    }

    async fn all_ids(&self) -> Result<HashSet<TrackId>, CatalogError> {
        Ok(self.inner.tracks.lock().await.keys().copied().collect())
    }

    async fn delete(&self, id: TrackId) -> Result<(), CatalogError> {
        self.inner.tracks.lock().await.remove(&id);
        self.inner.deleted.lock().await.push(id);
        Ok(())
    }
}

#[derive(Clone)]
struct MemoryStateStore {
    inner: Arc<Mutex<PersistedState>>,
    fail_load: bool,
}

impl MemoryStateStore {
    fn new(state: PersistedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
            fail_load: false,
        }
    }

    fn failing_load() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PersistedState::default())),
            fail_load: true,
        }
    }

    async fn state(&self) -> PersistedState {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        if self.fail_load {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no state file",
            )));
        }
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        *self.inner.lock().await = state.clone();
        Ok(())
    }
}

// --- Scenarios ---

// Test random picks avoid the recency window
#[tokio::test]
async fn test_random_pick_avoids_recent_tracks() {
    let a = track(1, "a");
    let b = track(2, "b");
    let c = track(3, "c");

    let daemon = FakeDaemon::start(HashSet::new()).await;
    let catalog = MemoryCatalog::new(vec![a.clone(), b.clone(), c.clone()]);
    let store = MemoryStateStore::new(PersistedState {
        queue: vec![],
        recent: vec![a.id],
    });

    let player = Arc::new(Player::new(test_client(daemon.port), catalog, store, 10));
    let run_player = player.clone();
    let run = tokio::spawn(async move { run_player.run().await });

    wait_until(|| async { daemon.added().await.len() >= 2 }).await;

    let added = daemon.added().await;
    let expected: HashSet<String> = [b.locator(), c.locator()].into_iter().collect();
    assert_eq!(added.iter().cloned().collect::<HashSet<_>>(), expected);

    run.abort();
}

// Test the explicit queue is drained FIFO before any random pick
#[tokio::test]
async fn test_persisted_queue_scheduled_first() {
    let a = track(1, "a");
    let b = track(2, "b");
    let c = track(3, "c");

    let daemon = FakeDaemon::start(HashSet::new()).await;
    let catalog = MemoryCatalog::new(vec![a.clone(), b.clone(), c.clone()]);
    let store = MemoryStateStore::new(PersistedState {
        queue: vec![c.id, b.id],
        recent: vec![],
    });

    let player = Arc::new(Player::new(
        test_client(daemon.port),
        catalog,
        store.clone(),
        10,
    ));
    let run_player = player.clone();
    let run = tokio::spawn(async move { run_player.run().await });

    wait_until(|| async { daemon.added().await.len() >= 2 }).await;

    let added = daemon.added().await;
    assert_eq!(added[0], c.locator());
    assert_eq!(added[1], b.locator());

    // Both pops were persisted
    assert!(store.state().await.queue.is_empty());

    run.abort();
}

// Test enqueue rejects tracks that are already current, next or queued
#[tokio::test]
async fn test_enqueue_rejects_duplicates() {
    let a = track(1, "a");
    let b = track(2, "b");

    let daemon = FakeDaemon::start(HashSet::new()).await;
    let catalog = MemoryCatalog::new(vec![a.clone(), b.clone()]);
    let store = MemoryStateStore::new(PersistedState::default());

    let player = Arc::new(Player::new(
        test_client(daemon.port),
        catalog.clone(),
        store.clone(),
        10,
    ));
    let run_player = player.clone();
    let run = tokio::spawn(async move { run_player.run().await });

    // Wait for steady state: both playlist slots filled and resolved
    wait_until(|| async {
        let np = player.now_playing().await;
        np.current.is_some() && np.next.is_some()
    })
    .await;

    let np = player.now_playing().await;
    let current = np.current.unwrap();
    let next = np.next.unwrap();

    assert!(!player.enqueue(current.clone()).await.unwrap());
    assert!(!player.enqueue(current).await.unwrap());
    assert!(!player.enqueue(next).await.unwrap());

    let d = track(7, "d");
    catalog.add(d.clone()).await;
    assert!(player.enqueue(d.clone()).await.unwrap());
    assert!(!player.enqueue(d.clone()).await.unwrap());

    assert_eq!(player.queued_tracks().await, vec![d.clone()]);
    assert_eq!(store.state().await.queue, vec![d.id]);

    run.abort();
}

// Test a rejected locator gets its catalog entry deleted and another pick made
#[tokio::test]
async fn test_rejected_locator_deletes_catalog_entry() {
    let x = track(1, "x");
    let y = track(2, "y");

    let reject: HashSet<String> = [x.locator()].into_iter().collect();
    let daemon = FakeDaemon::start(reject).await;
    let catalog = MemoryCatalog::new(vec![x.clone(), y.clone()]);
    let store = MemoryStateStore::new(PersistedState::default());

    let player = Arc::new(Player::new(
        test_client(daemon.port),
        catalog.clone(),
        store,
        10,
    ));
    let run_player = player.clone();
    let run = tokio::spawn(async move { run_player.run().await });

    wait_until(|| async { daemon.added().await.len() >= 2 }).await;

    // Only the playable track ever made it into the playlist, and the
    // broken one was purged from the catalog.
    let added = daemon.added().await;
    assert!(added.iter().all(|locator| *locator == y.locator()));
    assert_eq!(catalog.deleted_ids().await, vec![x.id]);

    run.abort();
}

// Test a one-track catalog keeps scheduling despite the recency window
#[tokio::test]
async fn test_single_track_catalog_never_starves() {
    let a = track(1, "a");

    let daemon = FakeDaemon::start(HashSet::new()).await;
    let catalog = MemoryCatalog::new(vec![a.clone()]);
    let store = MemoryStateStore::new(PersistedState {
        queue: vec![],
        recent: vec![a.id],
    });

    let player = Arc::new(Player::new(test_client(daemon.port), catalog, store, 10));
    let run_player = player.clone();
    let run = tokio::spawn(async move { run_player.run().await });

    wait_until(|| async { daemon.added().await.len() >= 2 }).await;

    let added = daemon.added().await;
    assert!(added.iter().all(|locator| *locator == a.locator()));

    run.abort();
}

// Test an unreadable state slot degrades to starting empty
#[tokio::test]
async fn test_unreadable_state_starts_empty() {
    let a = track(1, "a");
    let b = track(2, "b");

    let daemon = FakeDaemon::start(HashSet::new()).await;
    let catalog = MemoryCatalog::new(vec![a, b]);
    let store = MemoryStateStore::failing_load();

    let player = Arc::new(Player::new(test_client(daemon.port), catalog, store, 10));
    let run_player = player.clone();
    let run = tokio::spawn(async move { run_player.run().await });

    wait_until(|| async { daemon.added().await.len() >= 2 }).await;

    run.abort();
}

// Test subscribers observe an update once playback state is resolved
#[tokio::test]
async fn test_subscribers_receive_updates() {
    let a = track(1, "a");
    let b = track(2, "b");

    let daemon = FakeDaemon::start(HashSet::new()).await;
    let catalog = MemoryCatalog::new(vec![a, b]);
    let store = MemoryStateStore::new(PersistedState::default());

    let player = Arc::new(Player::new(test_client(daemon.port), catalog, store, 10));
    let mut events = player.subscribe();

    let run_player = player.clone();
    let run = tokio::spawn(async move { run_player.run().await });

    let resolved = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let PlayerEvent::Updated(now_playing) = events.recv().await.unwrap();
            if now_playing.current.is_some() && now_playing.next.is_some() {
                return now_playing;
            }
        }
    })
    .await
    .expect("no update with a resolved current track");

    assert_ne!(resolved.current, resolved.next);

    run.abort();
}

// Test played tracks are recorded in the recency window and trimmed to it
#[tokio::test]
async fn test_recency_window_is_persisted_and_bounded() {
    let a = track(1, "a");
    let b = track(2, "b");
    let c = track(3, "c");

    let daemon = FakeDaemon::start(HashSet::new()).await;
    let catalog = MemoryCatalog::new(vec![a, b, c]);
    let store = MemoryStateStore::new(PersistedState {
        queue: vec![],
        recent: vec![1, 2],
    });

    // Window of 2: every recorded play must push the oldest id out
    let player = Arc::new(Player::new(
        test_client(daemon.port),
        catalog,
        store.clone(),
        2,
    ));
    let run_player = player.clone();
    let run = tokio::spawn(async move {
        let _ = run_player.run().await;
    });

    wait_until(|| async {
        let state = store.state().await;
        state.recent.len() == 2 && state.recent != vec![1, 2]
    })
    .await;

    run.abort();
}
