use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_day, validate_stay};
use super::{Engine, EngineError, WalCommand};

/// Field-level checks shared by listing creation and update. The merged
/// listing is validated as a whole, so a patch can never leave a property
/// in a state that would have been rejected at creation.
fn validate_listing(listing: &Listing) -> Result<(), EngineError> {
    if listing.title.trim().is_empty() {
        return Err(EngineError::InvalidArgument("title required"));
    }
    if listing.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if listing.city.trim().is_empty() || listing.country.trim().is_empty() {
        return Err(EngineError::InvalidArgument("city and country required"));
    }
    for field in [&listing.city, &listing.state, &listing.country] {
        if field.len() > MAX_LOCATION_FIELD_LEN {
            return Err(EngineError::LimitExceeded("location field too long"));
        }
    }
    if listing.max_guests == 0 {
        return Err(EngineError::InvalidArgument("max_guests must be positive"));
    }
    if listing.max_guests > MAX_GUESTS_CAP {
        return Err(EngineError::LimitExceeded("max_guests above cap"));
    }
    if listing.nightly_price < 0 {
        return Err(EngineError::InvalidArgument("nightly_price must not be negative"));
    }
    if listing.amenities.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities"));
    }
    for amenity in &listing.amenities {
        if amenity.len() > MAX_AMENITY_LEN {
            return Err(EngineError::LimitExceeded("amenity too long"));
        }
    }
    if let Some(from) = listing.available_from {
        validate_day(from)?;
    }
    if let Some(to) = listing.available_to {
        validate_day(to)?;
    }
    if let (Some(from), Some(to)) = (listing.available_from, listing.available_to)
        && to < from {
            return Err(EngineError::InvalidStay("available_to before available_from"));
        }
    Ok(())
}

impl Engine {
    /// Register the session identity. Sessions authenticate as a ulid and
    /// then claim it here; registering any other id is refused.
    pub async fn register_user(
        &self,
        id: Ulid,
        email: String,
        display_name: String,
        role: Role,
        session_user: Ulid,
    ) -> Result<(), EngineError> {
        if id != session_user {
            return Err(EngineError::Forbidden("users may only register the session identity"));
        }
        if self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if !email.contains('@') {
            return Err(EngineError::InvalidArgument("malformed email"));
        }
        if display_name.trim().is_empty() {
            return Err(EngineError::InvalidArgument("display name required"));
        }
        if display_name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("display name too long"));
        }
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(existing) = self.email_index.get(&email) {
            return Err(EngineError::AlreadyExists(*existing));
        }

        let created_at = now_ms();
        let event = Event::UserRegistered {
            id,
            email: email.clone(),
            display_name: display_name.clone(),
            role,
            created_at,
        };
        self.wal_append(&event).await?;
        self.users.insert(id, User { id, email: email.clone(), display_name, role, created_at });
        self.email_index.insert(email, id);
        Ok(())
    }

    pub async fn list_property(
        &self,
        id: Ulid,
        actor: Actor,
        listing: Listing,
    ) -> Result<(), EngineError> {
        if actor.role != Role::Owner {
            return Err(EngineError::Forbidden("owner role required to list a property"));
        }
        if self.properties.len() >= MAX_PROPERTIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        validate_listing(&listing)?;
        if self.properties.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let created_at = now_ms();
        let event = Event::PropertyListed { id, owner_id: actor.id, listing: listing.clone(), created_at };
        self.wal_append(&event).await?;
        let ps = PropertyState::new(id, actor.id, listing, created_at);
        self.properties.insert(id, Arc::new(RwLock::new(ps)));
        self.owner_index.entry(actor.id).or_default().push(id);
        Ok(())
    }

    /// Apply a partial update to a listing. The patch is merged over the
    /// current listing and the result validated, so the event in the WAL
    /// always carries the complete post-update listing.
    pub async fn update_property(
        &self,
        id: Ulid,
        actor: Actor,
        patch: ListingPatch,
    ) -> Result<(), EngineError> {
        if patch.is_empty() {
            return Ok(());
        }
        let ps = self
            .get_property(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = ps.write().await;
        // A delist can land between the lookup and this lock.
        if !self.properties.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if guard.owner_id != actor.id {
            return Err(EngineError::Forbidden("not the property owner"));
        }
        let merged = patch.apply(&guard.listing);
        validate_listing(&merged)?;

        let event = Event::PropertyUpdated { id, listing: merged };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Remove a property from the marketplace. Refused while any ACCEPTED
    /// booking exists; pending bookings are dropped with the property.
    pub async fn delist_property(&self, id: Ulid, actor: Actor) -> Result<(), EngineError> {
        let ps = self
            .get_property(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = ps.write().await;
        if guard.owner_id != actor.id {
            return Err(EngineError::Forbidden("not the property owner"));
        }
        if let Some(blocking) = guard
            .bookings
            .iter()
            .find(|b| b.status == BookingStatus::Accepted)
        {
            return Err(EngineError::HasBookings(blocking.id));
        }

        let event = Event::PropertyDelisted { id };
        self.wal_append(&event).await?;
        for booking in &guard.bookings {
            self.booking_to_property.remove(&booking.id);
        }
        if let Some(mut owned) = self.owner_index.get_mut(&guard.owner_id) {
            owned.retain(|p| p != &id);
        }
        for mut favorites in self.favorites.iter_mut() {
            favorites.retain(|p| p != &id);
        }
        // Removed while the write lock is still held: writers that looked
        // the Arc up earlier re-check map membership under their own lock,
        // so nothing commits into a delisted property.
        self.properties.remove(&id);
        drop(guard);
        Ok(())
    }

    /// Create a PENDING booking request. Conflicts are checked against
    /// ACCEPTED bookings only, so several travelers can request the same
    /// dates and the owner picks which one to accept.
    pub async fn request_booking(
        &self,
        id: Ulid,
        property_id: Ulid,
        actor: Actor,
        stay: StayRange,
        guests: u32,
    ) -> Result<(), EngineError> {
        if actor.role != Role::Traveler {
            return Err(EngineError::Forbidden("traveler role required to request a booking"));
        }
        validate_stay(&stay)?;
        if guests == 0 {
            return Err(EngineError::InvalidArgument("guests must be positive"));
        }
        if self.booking_to_property.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let mut guard = ps.write().await;
        // A delist can land between the lookup and this lock.
        if !self.properties.contains_key(&property_id) {
            return Err(EngineError::NotFound(property_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many bookings on property"));
        }
        if guests > guard.listing.max_guests {
            return Err(EngineError::CapacityExceeded {
                requested: guests,
                max_guests: guard.listing.max_guests,
            });
        }

        check_no_conflict(&guard, &stay, None)?;

        let event = Event::BookingRequested {
            id,
            property_id,
            traveler_id: actor.id,
            stay,
            guests,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Drive a booking through its state machine. The conflict re-check on
    /// accept runs under the same property write lock as the commit, so two
    /// overlapping accepts can never both succeed.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        action: StatusAction,
        actor: Actor,
    ) -> Result<(), EngineError> {
        let (property_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(&id).ok_or(EngineError::NotFound(id))?;
        let (status, traveler_id, stay) = (booking.status, booking.traveler_id, booking.stay);
        let owner_id = guard.owner_id;

        match action {
            StatusAction::Accept => {
                if actor.id != owner_id {
                    return Err(EngineError::Forbidden("only the property owner may accept"));
                }
                if status != BookingStatus::Pending {
                    return Err(EngineError::InvalidState { id, status });
                }
                check_no_conflict(&guard, &stay, Some(id))?;

                let event = Event::BookingAccepted { id, property_id };
                self.persist_and_apply(&mut guard, &event).await
            }
            StatusAction::Cancel => {
                let is_owner = actor.id == owner_id;
                let is_traveler = actor.id == traveler_id;
                if !is_owner && !is_traveler {
                    return Err(EngineError::Forbidden("not the property owner or booking traveler"));
                }
                match status {
                    BookingStatus::Cancelled => {
                        return Err(EngineError::InvalidState { id, status });
                    }
                    BookingStatus::Accepted if !is_owner => {
                        return Err(EngineError::Forbidden(
                            "accepted bookings may only be cancelled by the owner",
                        ));
                    }
                    _ => {}
                }

                let event = Event::BookingCancelled { id, property_id };
                self.persist_and_apply(&mut guard, &event).await
            }
        }
    }

    pub async fn add_favorite(&self, actor: Actor, property_id: Ulid) -> Result<(), EngineError> {
        if actor.role != Role::Traveler {
            return Err(EngineError::Forbidden("traveler role required"));
        }
        if !self.properties.contains_key(&property_id) {
            return Err(EngineError::NotFound(property_id));
        }
        if let Some(favorites) = self.favorites.get(&actor.id) {
            if favorites.contains(&property_id) {
                return Err(EngineError::AlreadyExists(property_id));
            }
            if favorites.len() >= MAX_FAVORITES_PER_TRAVELER {
                return Err(EngineError::LimitExceeded("too many favorites"));
            }
        }

        let event = Event::FavoriteAdded { traveler_id: actor.id, property_id };
        self.wal_append(&event).await?;
        self.apply_favorite(&event);
        Ok(())
    }

    pub async fn remove_favorite(&self, actor: Actor, property_id: Ulid) -> Result<(), EngineError> {
        if actor.role != Role::Traveler {
            return Err(EngineError::Forbidden("traveler role required"));
        }
        let present = self
            .favorites
            .get(&actor.id)
            .is_some_and(|favorites| favorites.contains(&property_id));
        if !present {
            return Err(EngineError::NotFound(property_id));
        }

        let event = Event::FavoriteRemoved { traveler_id: actor.id, property_id };
        self.wal_append(&event).await?;
        self.apply_favorite(&event);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            let user = entry.value();
            events.push(Event::UserRegistered {
                id: user.id,
                email: user.email.clone(),
                display_name: user.display_name.clone(),
                role: user.role,
                created_at: user.created_at,
            });
        }

        // Snapshot the id set first: holding a DashMap shard ref across the
        // read().await below would risk deadlocking against writers.
        let property_ids: Vec<Ulid> = self.properties.iter().map(|e| *e.key()).collect();
        for id in property_ids {
            let ps = match self.get_property(&id) {
                Some(ps) => ps,
                None => continue,
            };
            let guard = ps.read().await;
            events.push(Event::PropertyListed {
                id: guard.id,
                owner_id: guard.owner_id,
                listing: guard.listing.clone(),
                created_at: guard.created_at,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: booking.id,
                    property_id: guard.id,
                    traveler_id: booking.traveler_id,
                    stay: booking.stay,
                    guests: booking.guests,
                    created_at: booking.created_at,
                });
                match booking.status {
                    BookingStatus::Pending => {}
                    BookingStatus::Accepted => {
                        events.push(Event::BookingAccepted { id: booking.id, property_id: guard.id });
                    }
                    BookingStatus::Cancelled => {
                        events.push(Event::BookingCancelled { id: booking.id, property_id: guard.id });
                    }
                }
            }
        }

        for entry in self.favorites.iter() {
            let traveler_id = *entry.key();
            for property_id in entry.value() {
                events.push(Event::FavoriteAdded { traveler_id, property_id: *property_id });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
