mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_ranges, merge_blocked, subtract_days, window_admits};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub properties: DashMap<Ulid, SharedPropertyState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id to owning property id. Entries outlive
    /// cancellation so terminal bookings still resolve.
    pub(super) booking_to_property: DashMap<Ulid, Ulid>,
    /// Owner id to property ids, in listing order.
    pub(super) owner_index: DashMap<Ulid, Vec<Ulid>>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) email_index: DashMap<String, Ulid>,
    /// Traveler id to favorited property ids, in insertion order.
    pub(super) favorites: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event directly to a PropertyState (caller holds the lock).
fn apply_to_property(ps: &mut PropertyState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingRequested {
            id,
            property_id,
            traveler_id,
            stay,
            guests,
            created_at,
        } => {
            ps.insert_booking(Booking {
                id: *id,
                traveler_id: *traveler_id,
                stay: *stay,
                guests: *guests,
                status: BookingStatus::Pending,
                created_at: *created_at,
            });
            booking_map.insert(*id, *property_id);
        }
        Event::BookingAccepted { id, .. } => {
            if let Some(booking) = ps.booking_mut(id) {
                booking.status = BookingStatus::Accepted;
            }
        }
        // Cancelled bookings stay on the property as records; the id must
        // keep resolving so a second cancel hits the terminal-state error.
        Event::BookingCancelled { id, .. } => {
            if let Some(booking) = ps.booking_mut(id) {
                booking.status = BookingStatus::Cancelled;
            }
        }
        Event::PropertyUpdated { listing, .. } => {
            ps.listing = listing.clone();
        }
        // Listing/delisting, users, and favorites are handled at the map level, not here
        Event::PropertyListed { .. }
        | Event::PropertyDelisted { .. }
        | Event::UserRegistered { .. }
        | Event::FavoriteAdded { .. }
        | Event::FavoriteRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            properties: DashMap::new(),
            wal_tx,
            booking_to_property: DashMap::new(),
            owner_index: DashMap::new(),
            users: DashMap::new(),
            email_index: DashMap::new(),
            favorites: DashMap::new(),
        };

        // Replay events. We're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::UserRegistered { id, email, display_name, role, created_at } => {
                    engine.users.insert(*id, User {
                        id: *id,
                        email: email.clone(),
                        display_name: display_name.clone(),
                        role: *role,
                        created_at: *created_at,
                    });
                    engine.email_index.insert(email.clone(), *id);
                }
                Event::PropertyListed { id, owner_id, listing, created_at } => {
                    let ps = PropertyState::new(*id, *owner_id, listing.clone(), *created_at);
                    engine.properties.insert(*id, Arc::new(RwLock::new(ps)));
                    engine.owner_index.entry(*owner_id).or_default().push(*id);
                }
                Event::PropertyDelisted { id } => {
                    if let Some((_, ps)) = engine.properties.remove(id) {
                        let guard = ps.try_read().expect("replay: uncontended read");
                        for booking in &guard.bookings {
                            engine.booking_to_property.remove(&booking.id);
                        }
                        if let Some(mut owned) = engine.owner_index.get_mut(&guard.owner_id) {
                            owned.retain(|p| p != id);
                        }
                    }
                    for mut favorites in engine.favorites.iter_mut() {
                        favorites.retain(|p| p != id);
                    }
                }
                Event::FavoriteAdded { .. } | Event::FavoriteRemoved { .. } => {
                    engine.apply_favorite(event);
                }
                other => {
                    if let Some(property_id) = event_property_id(other)
                        && let Some(entry) = engine.properties.get(&property_id) {
                            let ps_arc = entry.clone();
                            let mut guard = ps_arc.try_write().expect("replay: uncontended write");
                            apply_to_property(&mut guard, other, &engine.booking_to_property);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_property(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.properties.get(id).map(|e| e.value().clone())
    }

    pub fn get_property_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_property.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_property(ps, event, &self.booking_to_property);
        Ok(())
    }

    /// Lookup booking id to property, get property, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<PropertyState>), EngineError> {
        let property_id = self
            .get_property_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.write_owned().await;
        // A delist can land between the lookup and this lock; its scrub
        // runs under the same lock, so membership here means still listed.
        if !self.properties.contains_key(&property_id) {
            return Err(EngineError::NotFound(*booking_id));
        }
        Ok((property_id, guard))
    }

    /// Favorites are idempotent under replay: a duplicate add or a remove
    /// of an absent entry is a no-op.
    pub(super) fn apply_favorite(&self, event: &Event) {
        match event {
            Event::FavoriteAdded { traveler_id, property_id } => {
                let mut favorites = self.favorites.entry(*traveler_id).or_default();
                if !favorites.contains(property_id) {
                    favorites.push(*property_id);
                }
            }
            Event::FavoriteRemoved { traveler_id, property_id } => {
                if let Some(mut favorites) = self.favorites.get_mut(traveler_id) {
                    favorites.retain(|p| p != property_id);
                }
            }
            _ => {}
        }
    }
}

/// Extract the property id from events that mutate a single property's state.
fn event_property_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingRequested { property_id, .. }
        | Event::BookingAccepted { property_id, .. }
        | Event::BookingCancelled { property_id, .. } => Some(*property_id),
        Event::PropertyUpdated { id, .. } => Some(*id),
        Event::PropertyListed { .. }
        | Event::PropertyDelisted { .. }
        | Event::UserRegistered { .. }
        | Event::FavoriteAdded { .. }
        | Event::FavoriteRemoved { .. } => None,
    }
}
