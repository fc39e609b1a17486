use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// A booking with its live overtime fields.
    pub async fn get_booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        let room_id = self
            .store
            .room_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let schedule = self
            .store
            .get_schedule(&room_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = schedule.read().await;
        let booking = guard.get(id).ok_or(EngineError::NotFound(id))?;
        Ok(self.view(booking, self.now()))
    }

    /// Bookings matching `filter`, oldest first, one page at a time.
    pub async fn list_bookings(&self, filter: BookingFilter, page: Page) -> Vec<BookingView> {
        let schedules: Vec<_> = match filter.room_id {
            Some(room_id) => self.store.get_schedule(&room_id).into_iter().collect(),
            None => self.store.schedules(),
        };
        let now = self.now();

        let mut matched = Vec::new();
        for schedule in schedules {
            let guard = schedule.read().await;
            matched.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| filter.status.is_none_or(|s| b.status == s))
                    .cloned(),
            );
        }
        // ULIDs sort by creation time.
        matched.sort_by_key(|b| b.id);
        matched
            .iter()
            .skip(page.offset())
            .take(page.limit)
            .map(|b| self.view(b, now))
            .collect()
    }

    pub fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        self.store.get_room(&id).ok_or(EngineError::RoomNotFound(id))
    }

    /// Rooms whose name contains `name_filter` (case-insensitive), by name.
    pub fn list_rooms(&self, name_filter: Option<&str>, page: Page) -> Vec<Room> {
        let needle = name_filter
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());
        let mut rooms: Vec<Room> = self
            .store
            .rooms()
            .into_iter()
            .filter(|r| {
                needle
                    .as_deref()
                    .is_none_or(|n| r.name.to_lowercase().contains(n))
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
            .into_iter()
            .skip(page.offset())
            .take(page.limit)
            .collect()
    }

    /// The room and all of its bookings in start order.
    pub async fn room_detail(&self, id: Ulid) -> Result<RoomDetail, EngineError> {
        let room = self.get_room(id)?;
        let now = self.now();
        let bookings = match self.store.get_schedule(&id) {
            Some(schedule) => {
                let guard = schedule.read().await;
                guard.bookings.iter().map(|b| self.view(b, now)).collect()
            }
            None => Vec::new(),
        };
        Ok(RoomDetail { room, bookings })
    }
}
