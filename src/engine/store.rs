use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

/// All bookings on one room, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub room_id: Ulid,
    pub bookings: Vec<Booking>,
}

pub type SharedSchedule = Arc<RwLock<Schedule>>;

impl Schedule {
    pub fn new(room_id: Ulid) -> Self {
        Self {
            room_id,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps `query`, regardless of status.
    /// Everything at or after the first booking starting at `query.end` is skipped.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// In-memory state rebuilt from the WAL: rooms, per-room schedules, admins,
/// and the indexes that enforce uniqueness.
pub struct Store {
    rooms: DashMap<Ulid, Room>,
    room_names: DashMap<String, Ulid>,
    /// Keyed by room id; outlives the room while it still holds bookings.
    schedules: DashMap<Ulid, SharedSchedule>,
    booking_to_room: DashMap<Ulid, Ulid>,
    tokens: DashMap<String, Ulid>,
    admins: DashMap<Ulid, Admin>,
    admin_usernames: DashMap<String, Ulid>,
    admin_emails: DashMap<String, Ulid>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            room_names: DashMap::new(),
            schedules: DashMap::new(),
            booking_to_room: DashMap::new(),
            tokens: DashMap::new(),
            admins: DashMap::new(),
            admin_usernames: DashMap::new(),
            admin_emails: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get_room(&self, id: &Ulid) -> Option<Room> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|r| *r.key()).collect()
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.iter().map(|r| r.value().clone()).collect()
    }

    /// Empty when the room no longer exists.
    pub fn room_name(&self, id: &Ulid) -> String {
        self.rooms
            .get(id)
            .map(|r| r.name.clone())
            .unwrap_or_default()
    }

    pub fn room_id_by_name(&self, name: &str) -> Option<Ulid> {
        self.room_names.get(name).map(|e| *e.value())
    }

    // ── Schedules ────────────────────────────────────────────

    pub fn get_schedule(&self, room_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(room_id).map(|e| e.value().clone())
    }

    pub fn schedule_or_create(&self, room_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(Schedule::new(room_id))))
            .value()
            .clone()
    }

    /// Drop the schedule of a deleted room once it is empty and unlocked.
    pub fn release_if_orphaned(&self, room_id: &Ulid) {
        if self.rooms.contains_key(room_id) {
            return;
        }
        self.schedules
            .remove_if(room_id, |_, s| s.try_read().is_ok_and(|g| g.bookings.is_empty()));
    }

    pub fn schedules(&self) -> Vec<SharedSchedule> {
        self.schedules.iter().map(|e| e.value().clone()).collect()
    }

    // ── Booking indexes ──────────────────────────────────────

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_for_token(&self, token: &str) -> Option<Ulid> {
        self.tokens.get(token).map(|e| *e.value())
    }

    pub fn token_in_use(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_room.len()
    }

    // ── Admins ───────────────────────────────────────────────

    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    pub fn get_admin(&self, id: &Ulid) -> Option<Admin> {
        self.admins.get(id).map(|a| a.value().clone())
    }

    pub fn admin_by_username(&self, username: &str) -> Option<Admin> {
        let id = *self.admin_usernames.get(username)?.value();
        self.get_admin(&id)
    }

    pub fn admin_by_email(&self, email: &str) -> Option<Admin> {
        let id = *self.admin_emails.get(&email.to_lowercase())?.value();
        self.get_admin(&id)
    }

    pub fn admins(&self) -> Vec<Admin> {
        self.admins.iter().map(|a| a.value().clone()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event. Booking events touch the schedules in `locked`, which
    /// the caller already holds write guards for; room and admin events
    /// ignore it.
    pub fn apply_event(&self, event: &Event, locked: &mut [&mut Schedule]) {
        match event {
            Event::RoomCreated { room } => {
                self.room_names.insert(room.name.clone(), room.id);
                self.rooms.insert(room.id, room.clone());
                self.schedule_or_create(room.id);
            }
            Event::RoomUpdated { room } => {
                if let Some(old) = self.rooms.insert(room.id, room.clone())
                    && old.name != room.name
                {
                    self.room_names.remove(&old.name);
                }
                self.room_names.insert(room.name.clone(), room.id);
            }
            Event::RoomDeleted { id } => {
                if let Some((_, room)) = self.rooms.remove(id) {
                    self.room_names.remove(&room.name);
                }
                // Bookings are not cascaded; keep the schedule while it holds any.
                self.release_if_orphaned(id);
            }
            Event::BookingCreated { booking } => {
                if let Some(schedule) = find(locked, booking.room_id) {
                    self.booking_to_room.insert(booking.id, booking.room_id);
                    self.tokens.insert(booking.checkout_token.clone(), booking.id);
                    schedule.insert(booking.clone());
                }
            }
            Event::BookingStatusChanged { id, room_id, status } => {
                if let Some(schedule) = find(locked, *room_id)
                    && let Some(pos) = schedule.bookings.iter().position(|b| b.id == *id)
                {
                    schedule.bookings[pos].status = *status;
                }
            }
            Event::BookingUpdated {
                previous_room_id,
                booking,
            } => {
                let removed = find(locked, *previous_room_id).and_then(|s| s.remove(booking.id));
                if removed.is_some()
                    && let Some(target) = find(locked, booking.room_id)
                {
                    target.insert(booking.clone());
                    self.booking_to_room.insert(booking.id, booking.room_id);
                }
            }
            Event::BookingDeleted { id, room_id } => {
                if let Some(schedule) = find(locked, *room_id)
                    && let Some(booking) = schedule.remove(*id)
                {
                    self.booking_to_room.remove(id);
                    self.tokens.remove(&booking.checkout_token);
                }
            }
            Event::AdminRegistered { admin } => {
                self.admin_usernames.insert(admin.username.clone(), admin.id);
                self.admin_emails.insert(admin.email.to_lowercase(), admin.id);
                self.admins.insert(admin.id, admin.clone());
            }
            Event::ResetOtpIssued { admin_id, otp } => {
                if let Some(mut admin) = self.admins.get_mut(admin_id) {
                    admin.reset = Some(otp.clone());
                }
            }
            Event::PasswordReset {
                admin_id,
                password_hash,
            } => {
                if let Some(mut admin) = self.admins.get_mut(admin_id) {
                    admin.password_hash = password_hash.clone();
                    admin.reset = None;
                }
            }
        }
    }
}

fn find<'a>(locked: &'a mut [&mut Schedule], room_id: Ulid) -> Option<&'a mut Schedule> {
    locked
        .iter_mut()
        .find(|s| s.room_id == room_id)
        .map(|s| &mut **s)
}

/// Rooms whose schedules an event touches, in lock order.
pub fn event_room_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::BookingCreated { booking } => vec![booking.room_id],
        Event::BookingStatusChanged { room_id, .. } | Event::BookingDeleted { room_id, .. } => {
            vec![*room_id]
        }
        Event::BookingUpdated {
            previous_room_id,
            booking,
        } => {
            let mut ids = vec![*previous_room_id, booking.room_id];
            ids.sort();
            ids.dedup();
            ids
        }
        Event::RoomCreated { .. }
        | Event::RoomUpdated { .. }
        | Event::RoomDeleted { .. }
        | Event::AdminRegistered { .. }
        | Event::ResetOtpIssued { .. }
        | Event::PasswordReset { .. } => Vec::new(),
    }
}
