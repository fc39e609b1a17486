use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::checkout::mint_token;
use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKING_REQUESTS_TOTAL, BOOKING_TRANSITIONS_TOTAL, CHECKOUTS_TOTAL};

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError, Schedule};

fn validate_text(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded("field too long"));
    }
    Ok(())
}

/// Shape check only: one `@` with something on both sides and a dot in the
/// domain.
pub(super) fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    let plausible = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if plausible {
        Ok(())
    } else {
        Err(EngineError::Validation(format!("invalid email address: {email}")))
    }
}

fn validate_new_booking(input: &NewBooking) -> Result<(), EngineError> {
    validate_text("user_name", &input.user_name, MAX_NAME_LEN)?;
    validate_email(&input.user_email)?;
    validate_text("purpose", &input.purpose, MAX_PURPOSE_LEN)?;
    if input.attendees == 0 {
        return Err(EngineError::Validation("attendees must be at least 1".into()));
    }
    Ok(())
}

fn outcome_label(result: &Result<Booking, EngineError>) -> &'static str {
    match result {
        Ok(_) => "created",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::CapacityExceeded { .. }) => "capacity",
        Err(EngineError::RoomNotFound(_)) => "room_not_found",
        Err(EngineError::WalError(_) | EngineError::Internal(_)) => "error",
        Err(_) => "invalid",
    }
}

impl Engine {
    // ── Bookings ─────────────────────────────────────────────

    /// Validate, check capacity and conflicts, then persist a new `pending`
    /// booking. Check and insert run under the room's write lock.
    pub async fn create_booking(&self, input: NewBooking) -> Result<Booking, EngineError> {
        let result = self.try_create_booking(input).await;
        metrics::counter!(BOOKING_REQUESTS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        result
    }

    async fn try_create_booking(&self, input: NewBooking) -> Result<Booking, EngineError> {
        validate_new_booking(&input)?;
        let room = self
            .store
            .get_room(&input.room_id)
            .ok_or(EngineError::RoomNotFound(input.room_id))?;
        if input.attendees > room.capacity {
            return Err(EngineError::CapacityExceeded {
                attendees: input.attendees,
                capacity: room.capacity,
            });
        }
        let span = validate_span(input.start, input.end)?;

        let _commit = self.begin_commit().await;
        let schedule = self
            .store
            .get_schedule(&room.id)
            .ok_or(EngineError::RoomNotFound(room.id))?;
        let mut guard = schedule.write().await;
        // The room may have been deleted while we waited for the lock.
        let room = self
            .store
            .get_room(&room.id)
            .ok_or(EngineError::RoomNotFound(room.id))?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        check_no_conflict(&guard, &span)?;

        let mut checkout_token = mint_token();
        while self.store.token_in_use(&checkout_token) {
            checkout_token = mint_token();
        }
        let booking = Booking {
            id: self.next_id(),
            room_id: room.id,
            user_name: input.user_name.trim().to_string(),
            user_email: input.user_email,
            purpose: input.purpose,
            attendees: input.attendees,
            span,
            status: BookingStatus::Pending,
            checkout_token,
            created_at: self.now(),
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&event, &mut [&mut *guard]).await?;
        drop(guard);

        info!(booking = %booking.id, room = %room.name, "booking created");
        self.notify.booking_received(&booking, &room.name);
        Ok(booking)
    }

    /// `pending` or `rejected` → `approved`.
    pub async fn approve(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Approved).await
    }

    /// `pending` or `approved` → `rejected`.
    pub async fn reject(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Rejected).await
    }

    async fn transition(&self, id: Ulid, to: BookingStatus) -> Result<Booking, EngineError> {
        let _commit = self.begin_commit().await;
        let mut guard = self.lock_booking(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status == to {
            return Err(match to {
                BookingStatus::Approved => EngineError::AlreadyApproved(id),
                _ => EngineError::AlreadyRejected(id),
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            room_id: current.room_id,
            status: to,
        };
        self.persist_and_apply(&event, &mut [&mut *guard]).await?;
        drop(guard);

        let old = current.status;
        let booking = Booking {
            status: to,
            ..current
        };
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "status" => to.as_str()).increment(1);
        info!(booking = %id, "{old} -> {to}");

        let checkout_url = (to == BookingStatus::Approved)
            .then(|| self.links.url_for(&booking.checkout_token));
        let room_name = self.store.room_name(&booking.room_id);
        self.notify.status_changed(&booking, &room_name, old, checkout_url);
        Ok(booking)
    }

    /// Overwrite every field present in `patch`. Conflicts and capacity are
    /// not re-checked; the target room must exist and the merged range must
    /// stay non-empty.
    pub async fn update_booking(
        &self,
        id: Ulid,
        mut patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        let purpose = patch.purpose.take().filter(|p| !p.trim().is_empty());
        if let Some(p) = &purpose
            && p.len() > MAX_PURPOSE_LEN
        {
            return Err(EngineError::LimitExceeded("field too long"));
        }

        let _commit = self.begin_commit().await;
        loop {
            let previous_room_id = self
                .store
                .room_for_booking(&id)
                .ok_or(EngineError::NotFound(id))?;
            let target_room_id = patch.room_id.unwrap_or(previous_room_id);

            if target_room_id == previous_room_id {
                let mut guard = self.lock_booking(&id).await?;
                if guard.room_id != previous_room_id {
                    continue;
                }
                return self
                    .apply_patch(id, &patch, purpose.clone(), &mut [&mut *guard])
                    .await;
            }

            if self.store.get_room(&target_room_id).is_none() {
                return Err(EngineError::RoomNotFound(target_room_id));
            }
            let (Some(from), Some(to)) = (
                self.store.get_schedule(&previous_room_id),
                self.store.get_schedule(&target_room_id),
            ) else {
                return Err(EngineError::RoomNotFound(target_room_id));
            };
            let (first, second) = if previous_room_id < target_room_id {
                (from, to)
            } else {
                (to, from)
            };
            let mut g1 = first.write_owned().await;
            let mut g2 = second.write_owned().await;

            let still_there = [&*g1, &*g2]
                .iter()
                .any(|s| s.room_id == previous_room_id && s.get(id).is_some());
            if !still_there {
                if self.store.room_for_booking(&id).is_none() {
                    return Err(EngineError::NotFound(id));
                }
                continue;
            }
            if self.store.get_room(&target_room_id).is_none() {
                return Err(EngineError::RoomNotFound(target_room_id));
            }
            let result = self
                .apply_patch(id, &patch, purpose.clone(), &mut [&mut *g1, &mut *g2])
                .await;
            drop((g1, g2));
            self.store.release_if_orphaned(&previous_room_id);
            return result;
        }
    }

    async fn apply_patch(
        &self,
        id: Ulid,
        patch: &BookingPatch,
        purpose: Option<String>,
        locked: &mut [&mut Schedule],
    ) -> Result<Booking, EngineError> {
        let current = locked
            .iter()
            .find_map(|s| s.get(id))
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let start = patch.start.unwrap_or(current.span.start);
        let end = patch.end.unwrap_or(current.span.end);
        let span = Span::try_new(start, end).ok_or(EngineError::InvalidSpan { start, end })?;

        let updated = Booking {
            room_id: patch.room_id.unwrap_or(current.room_id),
            span,
            status: patch.status.unwrap_or(current.status),
            purpose: purpose.unwrap_or_else(|| current.purpose.clone()),
            ..current.clone()
        };
        if updated.room_id != current.room_id || updated.span != current.span {
            warn!(
                booking = %id,
                room = %updated.room_id,
                start = updated.span.start,
                end = updated.span.end,
                "booking moved without conflict or capacity check"
            );
        }

        let event = Event::BookingUpdated {
            previous_room_id: current.room_id,
            booking: updated.clone(),
        };
        self.persist_and_apply(&event, locked).await?;
        Ok(updated)
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _commit = self.begin_commit().await;
        let mut guard = self.lock_booking(&id).await?;
        let booking = self.remove_locked(id, &mut guard).await?;
        drop(guard);
        self.store.release_if_orphaned(&booking.room_id);
        info!(booking = %id, "booking deleted");
        Ok(booking)
    }

    /// The checkout path: whoever holds the token may delete the booking.
    pub async fn delete_by_token(&self, token: &str) -> Result<Booking, EngineError> {
        let id = self
            .store
            .booking_for_token(token)
            .ok_or(EngineError::TokenNotFound)?;

        let _commit = self.begin_commit().await;
        let mut guard = self.lock_booking(&id).await.map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::TokenNotFound,
            other => other,
        })?;
        if guard.get(id).is_none_or(|b| b.checkout_token != token) {
            return Err(EngineError::TokenNotFound);
        }
        let booking = self.remove_locked(id, &mut guard).await?;
        drop(guard);
        self.store.release_if_orphaned(&booking.room_id);

        metrics::counter!(CHECKOUTS_TOTAL).increment(1);
        info!(booking = %id, "booking checked out");
        Ok(booking)
    }

    async fn remove_locked(&self, id: Ulid, schedule: &mut Schedule) -> Result<Booking, EngineError> {
        let booking = schedule.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        let event = Event::BookingDeleted {
            id,
            room_id: booking.room_id,
        };
        self.persist_and_apply(&event, &mut [schedule]).await?;
        Ok(booking)
    }

    /// Delete every booking that ended more than `retention` ago, whatever
    /// its status. Returns how many were removed.
    pub async fn sweep_expired(&self, retention: Ms) -> usize {
        let cutoff = self.now() - retention;
        let mut removed = 0;
        for schedule in self.store.schedules() {
            let _commit = self.begin_commit().await;
            let mut guard = schedule.write().await;
            let expired: Vec<Ulid> = guard
                .bookings
                .iter()
                .filter(|b| b.span.end < cutoff)
                .map(|b| b.id)
                .collect();
            for id in expired {
                match self.remove_locked(id, &mut guard).await {
                    Ok(_) => removed += 1,
                    Err(e) => debug!(booking = %id, "sweep skipped: {e}"),
                }
            }
            let room_id = guard.room_id;
            drop(guard);
            self.store.release_if_orphaned(&room_id);
        }
        removed
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        name: String,
        description: String,
        capacity: u32,
    ) -> Result<Room, EngineError> {
        let name = name.trim().to_string();
        validate_text("name", &name, MAX_NAME_LEN)?;
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1".into()));
        }

        let _commit = self.begin_commit().await;
        let _catalog = self.catalog.lock().await;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.store.room_id_by_name(&name).is_some() {
            return Err(EngineError::AlreadyExists(format!("room {name}")));
        }
        let room = Room {
            id: self.next_id(),
            name,
            description,
            capacity,
        };
        self.persist_and_apply(&Event::RoomCreated { room: room.clone() }, &mut [])
            .await?;
        info!(room = %room.id, name = %room.name, "room created");
        Ok(room)
    }

    /// Blank names and descriptions and a zero capacity leave the stored
    /// value untouched.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let name = patch
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let description = patch.description.filter(|d| !d.trim().is_empty());
        let capacity = patch.capacity.filter(|c| *c > 0);
        if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("field too long"));
        }
        if description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
            return Err(EngineError::LimitExceeded("description too long"));
        }

        let _commit = self.begin_commit().await;
        let _catalog = self.catalog.lock().await;
        let current = self.store.get_room(&id).ok_or(EngineError::RoomNotFound(id))?;
        if let Some(n) = &name
            && self.store.room_id_by_name(n).is_some_and(|other| other != id)
        {
            return Err(EngineError::AlreadyExists(format!("room {n}")));
        }
        let room = Room {
            id,
            name: name.unwrap_or(current.name),
            description: description.unwrap_or(current.description),
            capacity: capacity.unwrap_or(current.capacity),
        };
        self.persist_and_apply(&Event::RoomUpdated { room: room.clone() }, &mut [])
            .await?;
        Ok(room)
    }

    /// Bookings on the room survive and keep showing up in listings.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.begin_commit().await;
        let _catalog = self.catalog.lock().await;
        let room = self.store.get_room(&id).ok_or(EngineError::RoomNotFound(id))?;
        self.persist_and_apply(&Event::RoomDeleted { id }, &mut []).await?;
        info!(room = %id, name = %room.name, "room deleted");
        Ok(())
    }
}
