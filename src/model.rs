use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for creation timestamps only.
pub type Ms = i64;

/// Inclusive range of calendar days `[start, end]`: both endpoints are
/// occupied nights' days. Dates carry no time-of-day component, so every
/// comparison is already day-normalized by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl StayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "StayRange start must not be after end");
        Self { start, end }
    }

    /// Number of nights: check-in on `start`, check-out on `end`.
    /// Zero for a single-day range.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Number of calendar days covered, inclusive of both endpoints.
    pub fn days(&self) -> i64 {
        self.nights() + 1
    }

    /// Inclusive overlap: true iff the ranges share at least one calendar
    /// day. A stay ending on day D conflicts with one starting on day D;
    /// same-day turnover counts as overlap.
    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &StayRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Traveler,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "OWNER",
            Role::Traveler => "TRAVELER",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.to_ascii_uppercase().as_str() {
            "OWNER" => Some(Role::Owner),
            "TRAVELER" => Some(Role::Traveler),
            _ => None,
        }
    }
}

/// The authenticated caller of an engine operation. Identity and role
/// are always passed explicitly, never read from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: Ms,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Accepted => "ACCEPTED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// ACCEPTED and CANCELLED admit no transition except the owner's
    /// ACCEPTED → CANCELLED; PENDING is the only open state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

/// Requested transition for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Accept,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub traveler_id: Ulid,
    pub stay: StayRange,
    pub guests: u32,
    pub status: BookingStatus,
    pub created_at: Ms,
}

// ── Properties ───────────────────────────────────────────────────

/// The owner-editable description of a property. Shared between the
/// listing/update events and the live state so the two can never drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub max_guests: u32,
    /// Nightly price in minor currency units.
    pub nightly_price: i64,
    pub amenities: Vec<String>,
    /// Bookable window bounds; absent = unbounded on that side.
    pub available_from: Option<NaiveDate>,
    pub available_to: Option<NaiveDate>,
}

impl Listing {
    /// Lowercased "city state country" blob that location tokens are
    /// substring-matched against.
    pub fn location_haystack(&self) -> String {
        format!("{} {} {}", self.city, self.state, self.country).to_lowercase()
    }
}

/// Partial listing update: `None` leaves a field untouched. The window
/// bounds nest an Option so `SET available_from = NULL` can clear one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPatch {
    pub title: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub max_guests: Option<u32>,
    pub nightly_price: Option<i64>,
    pub amenities: Option<Vec<String>>,
    pub available_from: Option<Option<NaiveDate>>,
    pub available_to: Option<Option<NaiveDate>>,
}

impl ListingPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, base: &Listing) -> Listing {
        Listing {
            title: self.title.clone().unwrap_or_else(|| base.title.clone()),
            city: self.city.clone().unwrap_or_else(|| base.city.clone()),
            state: self.state.clone().unwrap_or_else(|| base.state.clone()),
            country: self.country.clone().unwrap_or_else(|| base.country.clone()),
            max_guests: self.max_guests.unwrap_or(base.max_guests),
            nightly_price: self.nightly_price.unwrap_or(base.nightly_price),
            amenities: self
                .amenities
                .clone()
                .unwrap_or_else(|| base.amenities.clone()),
            available_from: self.available_from.unwrap_or(base.available_from),
            available_to: self.available_to.unwrap_or(base.available_to),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub listing: Listing,
    pub created_at: Ms,
    /// Every booking ever requested (all statuses), sorted by check-in day.
    pub bookings: Vec<Booking>,
}

impl PropertyState {
    pub fn new(id: Ulid, owner_id: Ulid, listing: Listing, created_at: Ms) -> Self {
        Self {
            id,
            owner_id,
            listing,
            created_at,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by check-in day.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.start, |b| b.stay.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Return only bookings whose stay overlaps the query range.
    /// Uses binary search to skip bookings checking in after `query.end`;
    /// a booking checking in exactly on `query.end` still overlaps
    /// (inclusive days).
    pub fn overlapping(&self, query: StayRange) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound checks in after query.end, so it can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.end >= query.start)
    }

    /// ACCEPTED bookings overlapping the query, skipping `exclude` (the
    /// booking under evaluation, when it already exists as a record).
    pub fn accepted_overlapping<'a>(
        &'a self,
        query: &StayRange,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a Booking> {
        self.overlapping(*query)
            .filter(move |b| b.status == BookingStatus::Accepted && Some(b.id) != exclude)
    }
}

// ── Events ───────────────────────────────────────────────────────

/// The WAL record format. Booking and favorite events name their property
/// so replay can route them without auxiliary state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        email: String,
        display_name: String,
        role: Role,
        created_at: Ms,
    },
    PropertyListed {
        id: Ulid,
        owner_id: Ulid,
        listing: Listing,
        created_at: Ms,
    },
    PropertyUpdated {
        id: Ulid,
        /// Full post-update listing; partial updates are merged before the
        /// event is written so replay never needs the previous value.
        listing: Listing,
    },
    PropertyDelisted {
        id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        property_id: Ulid,
        traveler_id: Ulid,
        stay: StayRange,
        guests: u32,
        created_at: Ms,
    },
    BookingAccepted {
        id: Ulid,
        property_id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        property_id: Ulid,
    },
    FavoriteAdded {
        traveler_id: Ulid,
        property_id: Ulid,
    },
    FavoriteRemoved {
        traveler_id: Ulid,
        property_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub title: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub max_guests: u32,
    pub nightly_price: i64,
    pub amenities: Vec<String>,
    pub available_from: Option<NaiveDate>,
    pub available_to: Option<NaiveDate>,
    pub created_at: Ms,
}

impl PropertyInfo {
    pub fn from_state(ps: &PropertyState) -> Self {
        Self {
            id: ps.id,
            owner_id: ps.owner_id,
            title: ps.listing.title.clone(),
            city: ps.listing.city.clone(),
            state: ps.listing.state.clone(),
            country: ps.listing.country.clone(),
            max_guests: ps.listing.max_guests,
            nightly_price: ps.listing.nightly_price,
            amenities: ps.listing.amenities.clone(),
            available_from: ps.listing.available_from,
            available_to: ps.listing.available_to,
            created_at: ps.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub property_id: Ulid,
    pub traveler_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl BookingInfo {
    pub fn from_booking(property_id: Ulid, b: &Booking) -> Self {
        Self {
            id: b.id,
            property_id,
            traveler_id: b.traveler_id,
            check_in: b.stay.start,
            check_out: b.stay.end,
            guests: b.guests,
            status: b.status,
            created_at: b.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: Ms,
}

impl UserInfo {
    pub fn from_user(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            role: u.role,
            created_at: u.created_at,
        }
    }
}
