//! Hard caps protecting the engine from unbounded growth and garbage input.
//! All are generous for a prototype marketplace; hitting one returns
//! `EngineError::LimitExceeded` rather than degrading silently.

/// Calendar sanity bounds for any date accepted over the wire.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Longest bookable stay, in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Widest free-calendar query window, in days (inclusive).
pub const MAX_QUERY_WINDOW_DAYS: i64 = 1100;

pub const MAX_USERS_PER_TENANT: usize = 100_000;
pub const MAX_PROPERTIES_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_PROPERTY: usize = 10_000;
pub const MAX_FAVORITES_PER_TRAVELER: usize = 1_000;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_LOCATION_FIELD_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_AMENITIES: usize = 50;
pub const MAX_AMENITY_LEN: usize = 50;
pub const MAX_GUESTS_CAP: u32 = 1_000;
pub const MAX_LOCATION_TOKENS: usize = 10;

/// Tenant registry bounds (one engine + WAL file per database name).
pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 64;
