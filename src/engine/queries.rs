use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{free_ranges, window_admits};
use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Resolve a session ulid to a full Actor. Commands that need a role
    /// go through this, so identity is checked once per statement.
    pub fn actor(&self, id: &Ulid) -> Result<Actor, EngineError> {
        self.users
            .get(id)
            .map(|u| Actor { id: u.id, role: u.role })
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn get_user(&self, id: &Ulid) -> Result<UserInfo, EngineError> {
        self.users
            .get(id)
            .map(|u| UserInfo::from_user(u.value()))
            .ok_or(EngineError::NotFound(*id))
    }

    /// The marketplace search. Location tokens OR-match as case-insensitive
    /// substrings of "city state country"; a date range keeps only
    /// properties whose availability window contains it and that have no
    /// ACCEPTED booking overlapping it; min_guests filters on capacity.
    ///
    /// All filters are optional: empty tokens skip the location test,
    /// `None` for the range skips both date tests, min_guests 0 admits all.
    pub async fn search_available(
        &self,
        tokens: &[String],
        stay: Option<StayRange>,
        min_guests: u32,
    ) -> Result<Vec<PropertyInfo>, EngineError> {
        if tokens.len() > MAX_LOCATION_TOKENS {
            return Err(EngineError::LimitExceeded("too many location tokens"));
        }
        if let Some(ref window) = stay {
            validate_window(window)?;
        }
        let lowered: Vec<String> = tokens
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let ids: Vec<Ulid> = self.properties.iter().map(|e| *e.key()).collect();
        let mut hits = Vec::new();
        for id in ids {
            let ps = match self.get_property(&id) {
                Some(ps) => ps,
                None => continue,
            };
            let guard = ps.read().await;
            if guard.listing.max_guests < min_guests {
                continue;
            }
            if !lowered.is_empty() {
                let haystack = guard.listing.location_haystack();
                if !lowered.iter().any(|t| haystack.contains(t.as_str())) {
                    continue;
                }
            }
            if let Some(ref window) = stay {
                if !window_admits(&guard.listing, window) {
                    continue;
                }
                if guard.accepted_overlapping(window, None).next().is_some() {
                    continue;
                }
            }
            hits.push(PropertyInfo::from_state(&guard));
        }
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(hits)
    }

    pub async fn get_property_info(&self, id: Ulid) -> Result<PropertyInfo, EngineError> {
        let ps = self
            .get_property(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = ps.read().await;
        Ok(PropertyInfo::from_state(&guard))
    }

    /// All listings, optionally restricted to one owner, newest first.
    pub async fn list_properties(&self, owner_id: Option<Ulid>) -> Vec<PropertyInfo> {
        let ids: Vec<Ulid> = match owner_id {
            Some(oid) => self
                .owner_index
                .get(&oid)
                .map(|v| v.clone())
                .unwrap_or_default(),
            None => self.properties.iter().map(|e| *e.key()).collect(),
        };
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ps) = self.get_property(&id) {
                let guard = ps.read().await;
                infos.push(PropertyInfo::from_state(&guard));
            }
        }
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        infos
    }

    /// Every booking the traveler has requested, across all properties,
    /// newest first. Cancelled trips are included as history.
    pub async fn list_trips(&self, traveler_id: Ulid) -> Vec<BookingInfo> {
        let ids: Vec<Ulid> = self.properties.iter().map(|e| *e.key()).collect();
        let mut trips = Vec::new();
        for id in ids {
            let ps = match self.get_property(&id) {
                Some(ps) => ps,
                None => continue,
            };
            let guard = ps.read().await;
            for booking in &guard.bookings {
                if booking.traveler_id == traveler_id {
                    trips.push(BookingInfo::from_booking(guard.id, booking));
                }
            }
        }
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        trips
    }

    /// The owner-side counterpart of list_trips: every booking across the
    /// owner's properties, all statuses, newest first.
    pub async fn list_owner_bookings(&self, owner_id: Ulid) -> Vec<BookingInfo> {
        let ids: Vec<Ulid> = self
            .owner_index
            .get(&owner_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut bookings = Vec::new();
        for id in ids {
            let ps = match self.get_property(&id) {
                Some(ps) => ps,
                None => continue,
            };
            let guard = ps.read().await;
            for booking in &guard.bookings {
                bookings.push(BookingInfo::from_booking(id, booking));
            }
        }
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        bookings
    }

    /// The owner's view of a property's bookings, newest first. Travelers
    /// see their own requests through list_trips instead.
    pub async fn list_property_bookings(
        &self,
        property_id: Ulid,
        actor: Actor,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        if guard.owner_id != actor.id {
            return Err(EngineError::Forbidden("not the property owner"));
        }
        let mut bookings: Vec<BookingInfo> = guard
            .bookings
            .iter()
            .map(|b| BookingInfo::from_booking(property_id, b))
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(bookings)
    }

    pub async fn get_booking(
        &self,
        booking_id: Ulid,
        actor: Actor,
    ) -> Result<BookingInfo, EngineError> {
        let property_id = self
            .get_property_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if actor.id != guard.owner_id && actor.id != booking.traveler_id {
            return Err(EngineError::Forbidden("not the property owner or booking traveler"));
        }
        Ok(BookingInfo::from_booking(property_id, booking))
    }

    /// Free date ranges on a property within a window: the availability
    /// window clamped to the query, minus days taken by ACCEPTED stays.
    pub async fn calendar(
        &self,
        property_id: Ulid,
        window: StayRange,
    ) -> Result<Vec<StayRange>, EngineError> {
        validate_window(&window)?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(free_ranges(&guard, &window))
    }

    /// The traveler's favorites, most recently added first. Listings
    /// delisted since being favorited no longer appear.
    pub async fn list_favorites(&self, traveler_id: Ulid) -> Vec<PropertyInfo> {
        let ids: Vec<Ulid> = self
            .favorites
            .get(&traveler_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids.into_iter().rev() {
            if let Some(ps) = self.get_property(&id) {
                let guard = ps.read().await;
                infos.push(PropertyInfo::from_state(&guard));
            }
        }
        infos
    }
}
