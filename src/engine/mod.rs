mod admins;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::has_conflict;
pub use error::EngineError;
pub use store::{Schedule, SharedSchedule, Store};

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::checkout::CheckoutLinks;
use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use store::event_room_ids;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive while a batch is being collected share
/// one fsync; any other command first flushes the batch in front of it.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut trailing = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    trailing = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = trailing {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal<Event>, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so the partial batch is not
    // carried into the next one.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let status = if result.is_ok() { "ok" } else { "failed" };
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => status)
                .increment(1);
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub clock: Arc<dyn Clock>,
    pub links: CheckoutLinks,
    /// Mutations hold it shared from validation to apply; compaction holds
    /// it exclusively so no event lands between snapshot and swap. Always
    /// taken before any schedule lock.
    commit_gate: RwLock<()>,
    /// Serializes room and admin mutations so uniqueness checks see every
    /// committed name.
    pub(super) catalog: Mutex<()>,
    /// Ids stay strictly increasing within a millisecond, so id order is
    /// creation order.
    ids: std::sync::Mutex<ulid::Generator>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        links: CheckoutLinks,
    ) -> io::Result<Self> {
        let events: Vec<Event> = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            notify,
            clock,
            links,
            commit_gate: RwLock::new(()),
            catalog: Mutex::new(()),
            ids: std::sync::Mutex::new(ulid::Generator::new()),
        };

        // Nothing else can see these locks yet, so try_write always succeeds.
        for event in &events {
            let ids = event_room_ids(event);
            let arcs: Vec<SharedSchedule> = ids
                .iter()
                .map(|id| engine.store.schedule_or_create(*id))
                .collect();
            let mut guards: Vec<_> = arcs.iter().filter_map(|a| a.try_write().ok()).collect();
            let mut refs: Vec<&mut Schedule> = guards.iter_mut().map(|g| &mut **g).collect();
            engine.store.apply_event(event, &mut refs);
        }

        info!(
            "replayed {} events: {} rooms, {} bookings, {} admins",
            events.len(),
            engine.store.room_count(),
            engine.store.booking_count(),
            engine.store.admin_count()
        );
        Ok(engine)
    }

    pub(super) async fn begin_commit(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    pub(super) fn next_id(&self) -> Ulid {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.generate().unwrap_or_else(|_| Ulid::new())
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
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

    /// Durably log, then apply. `locked` must hold every schedule the event
    /// touches.
    pub(super) async fn persist_and_apply(
        &self,
        event: &Event,
        locked: &mut [&mut Schedule],
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(event, locked);
        Ok(())
    }

    /// Lookup booking → room, acquire that room's schedule write lock.
    pub(super) async fn lock_booking(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<Schedule>, EngineError> {
        loop {
            let room_id = self
                .store
                .room_for_booking(id)
                .ok_or(EngineError::NotFound(*id))?;
            let schedule = self
                .store
                .get_schedule(&room_id)
                .ok_or(EngineError::NotFound(*id))?;
            let guard = schedule.write_owned().await;
            // A concurrent move may have relocated the booking while we waited.
            if guard.get(*id).is_some() {
                return Ok(guard);
            }
            if self.store.room_for_booking(id) == Some(room_id) {
                return Err(EngineError::NotFound(*id));
            }
        }
    }

    pub fn view(&self, booking: &Booking, now: Ms) -> BookingView {
        let overtime = booking.overtime(now);
        BookingView {
            room_name: self.store.room_name(&booking.room_id),
            checkout_url: overtime.map(|_| self.links.url_for(&booking.checkout_token)),
            overtime,
            booking: booking.clone(),
        }
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as the minimal event set reproducing current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let mut events = Vec::new();
        for admin in self.store.admins() {
            events.push(Event::AdminRegistered { admin });
        }
        for room in self.store.rooms() {
            events.push(Event::RoomCreated { room });
        }
        for schedule in self.store.schedules() {
            let guard = schedule.read().await;
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
