use rand::seq::IndexedRandom;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, warn};

use crate::catalog::{decode_locator, Catalog, Track, TrackId};
use crate::client::MpdClient;
use crate::commands::Subsystem;
use crate::error::{MpdError, PlayerError};
use crate::events::{NowPlaying, PlayerEvent};
use crate::store::{PersistedState, StateStore};

const EVENT_BUFFER_CAPACITY: usize = 100;

#[derive(Default)]
struct PlayerInner {
    // User-requested tracks, FIFO
    queue: Vec<Track>,
    // Most-recently-played ids, oldest first, capped at the recency window
    recent: Vec<TrackId>,
    current_song_id: Option<u32>,
    current: Option<Track>,
    next_song_id: Option<u32>,
    next: Option<Track>,
}

/// The scheduler: reconciles the desired playback order against the
/// daemon-reported status, tops the server-side playlist up when it runs
/// low, and publishes change notifications.
///
/// All scheduler state is mutated under one internal lock; the
/// reconciliation loop never holds it across the blocking change wait, so
/// [`enqueue`](Player::enqueue) calls arriving concurrently are safe queue
/// appends picked up by the next pass.
pub struct Player<C, S> {
    client: MpdClient,
    catalog: C,
    store: S,
    recent_limit: usize,
    inner: RwLock<PlayerInner>,
    update_tx: broadcast::Sender<PlayerEvent>,
}

impl<C: Catalog, S: StateStore> Player<C, S> {
    pub fn new(client: MpdClient, catalog: C, store: S, recent_limit: usize) -> Self {
        let (update_tx, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        Self {
            client,
            catalog,
            store,
            recent_limit,
            inner: RwLock::new(PlayerInner::default()),
            update_tx,
        }
    }

    /// The protocol client, shared with foreground callers.
    pub fn client(&self) -> &MpdClient {
        &self.client
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.update_tx.subscribe()
    }

    /// Snapshot of the resolved current and next track.
    pub async fn now_playing(&self) -> NowPlaying {
        let inner = self.inner.read().await;
        NowPlaying {
            current: inner.current.clone(),
            next: inner.next.clone(),
        }
    }

    /// User-requested tracks still waiting to be scheduled, FIFO.
    pub async fn queued_tracks(&self) -> Vec<Track> {
        self.inner.read().await.queue.clone()
    }

    /// Drive the reconciliation loop forever: configure the daemon for
    /// deterministic queueing, load persisted state, then alternate between
    /// topping the playlist up and blocking on the change wait.
    ///
    /// Returning an error means the loop halted on an unexpected failure;
    /// the caller should log it and treat the process as restart-worthy.
    pub async fn run(&self) -> Result<(), PlayerError> {
        self.client.start();
        self.load_state().await;

        self.client.random(false).await?;
        self.client.repeat(false).await?;
        self.client.single(false).await?;
        self.client.consume(true).await?;

        while self.check_playlist().await? {
            self.client.idle(&[Subsystem::Playlist]).await?;
        }

        loop {
            self.client
                .idle(&[Subsystem::Playlist, Subsystem::Update, Subsystem::Player])
                .await?;
            self.check_playlist().await?;
        }
    }

    /// Queue a user-requested track. Returns `false` without touching the
    /// queue when the track is already current, next or queued.
    pub async fn enqueue(&self, track: Track) -> Result<bool, PlayerError> {
        {
            let mut inner = self.inner.write().await;
            let id = track.id;
            if inner.current.as_ref().is_some_and(|t| t.id == id)
                || inner.next.as_ref().is_some_and(|t| t.id == id)
                || inner.queue.iter().any(|t| t.id == id)
            {
                return Ok(false);
            }
            inner.queue.push(track);
            self.save_state(&inner).await;
        }

        self.check_playlist().await?;
        self.send_update().await;
        Ok(true)
    }

    async fn load_state(&self) {
        let state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Failed to load state, starting empty");
                return;
            }
        };

        let mut queue = Vec::with_capacity(state.queue.len());
        for id in state.queue {
            match self.catalog.get(id).await {
                Ok(Some(track)) => queue.push(track),
                Ok(None) => warn!(id, "Queued track vanished from catalog, dropping"),
                Err(e) => warn!(id, error = %e, "Failed to look up queued track, dropping"),
            }
        }

        let mut inner = self.inner.write().await;
        inner.queue = queue;
        inner.recent = state.recent;
    }

    async fn save_state(&self, inner: &PlayerInner) {
        let state = PersistedState {
            queue: inner.queue.iter().map(|t| t.id).collect(),
            recent: inner.recent.clone(),
        };
        if let Err(e) = self.store.save(&state).await {
            error!(error = %e, "Failed to save state");
        }
    }

    /// Append to recency and trim to the configured window from the front.
    async fn add_recent(&self, inner: &mut PlayerInner, id: TrackId) {
        inner.recent.push(id);
        let overflow = inner.recent.len().saturating_sub(self.recent_limit);
        if overflow > 0 {
            inner.recent.drain(..overflow);
        }
        self.save_state(inner).await;
    }

    /// One reconciliation pass. Returns `true` when the playlist was
    /// changed and should be re-checked before blocking on the change wait.
    async fn check_playlist(&self) -> Result<bool, PlayerError> {
        let status = self.client.status().await?;
        let mut inner = self.inner.write().await;

        let playlist_length = status.playlist_length().unwrap_or(0);
        if playlist_length < 2 {
            loop {
                let Some(track) = self.next_pick(&mut inner).await? else {
                    break;
                };

                match self.client.add_id(&track.locator()).await {
                    Ok(_) => {
                        if playlist_length == 0 {
                            self.add_recent(&mut inner, track.id).await;
                        }
                        return Ok(true);
                    }
                    Err(e @ MpdError::CommandFailed { .. }) => {
                        error!(
                            error = %e,
                            locator = %track.locator(),
                            "Failed to add track, deleting from catalog"
                        );
                        if let Err(e) = self.catalog.delete(track.id).await {
                            warn!(error = %e, id = track.id, "Failed to delete broken catalog entry");
                        }
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if status.state() != Some("play") {
            self.client.play().await?;
            return Ok(false);
        }

        let mut playlist_updated = false;

        let current_song_id = status.song_id();
        if current_song_id != inner.current_song_id {
            inner.current_song_id = current_song_id;
            playlist_updated = true;
            inner.current = self.track_for_playlist_id(current_song_id).await?;
            if let Some(id) = inner.current.as_ref().map(|t| t.id) {
                self.add_recent(&mut inner, id).await;
            }
        }

        let next_song_id = status.next_song_id();
        if next_song_id != inner.next_song_id {
            inner.next_song_id = next_song_id;
            playlist_updated = true;
            inner.next = self.track_for_playlist_id(next_song_id).await?;
        }

        drop(inner);
        if playlist_updated {
            self.send_update().await;
        }

        Ok(false)
    }

    /// Resolve a daemon-side playlist id to a catalog track. Any kind of
    /// miss (entry gone from the daemon, unparseable locator, track gone
    /// from the catalog) resolves to absent rather than an error.
    async fn track_for_playlist_id(
        &self,
        playlist_song_id: Option<u32>,
    ) -> Result<Option<Track>, PlayerError> {
        let Some(id) = playlist_song_id else {
            return Ok(None);
        };

        let response = match self.client.playlist_id(id).await {
            Ok(response) => response,
            // The entry can vanish between status and this query.
            Err(e) if e.is_no_such_file() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(file) = response.file() else {
            return Ok(None);
        };
        let Some((external_id, extension)) = decode_locator(file) else {
            warn!(file, "Unparseable locator in daemon playlist");
            return Ok(None);
        };

        Ok(self.catalog.find(&external_id, &extension).await?)
    }

    /// Select the next track to schedule: explicit queue head first, else a
    /// recency-avoiding uniform pick from the catalog.
    async fn next_pick(&self, inner: &mut PlayerInner) -> Result<Option<Track>, PlayerError> {
        if !inner.queue.is_empty() {
            let track = inner.queue.remove(0);
            self.save_state(inner).await;
            return Ok(Some(track));
        }

        loop {
            let ids = self.catalog.all_ids().await?;
            if ids.is_empty() {
                return Ok(None);
            }

            // Ids to avoid: the recency window (stale entries dropped) plus
            // the track the daemon will play next anyway.
            let mut avoid: Vec<TrackId> = inner
                .recent
                .iter()
                .copied()
                .filter(|id| ids.contains(id))
                .collect();
            if let Some(next) = &inner.next {
                if ids.contains(&next.id) {
                    avoid.push(next.id);
                }
            }

            let catalog_len = ids.len();
            let mut candidates = ids;
            if catalog_len > 1 {
                // Never exclude down to zero candidates.
                let cut = avoid.len().min(catalog_len - 1);
                for id in &avoid[avoid.len() - cut..] {
                    candidates.remove(id);
                }
            }

            let candidates: Vec<TrackId> = candidates.into_iter().collect();
            let Some(&id) = candidates.choose(&mut rand::rng()) else {
                return Ok(None);
            };

            match self.catalog.get(id).await? {
                Some(track) => return Ok(Some(track)),
                // The pick can go stale between queries; try again.
                None => continue,
            }
        }
    }

    async fn send_update(&self) {
        let snapshot = self.now_playing().await;
        let _ = self.update_tx.send(PlayerEvent::Updated(snapshot));
    }
}
