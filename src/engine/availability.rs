use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Availability filter: the requested stay must lie fully inside the
/// property's declared bookable window. Absent bound = unbounded on that
/// side. Containment, not overlap: a stay straddling a boundary is
/// excluded even though it intersects the window.
pub fn window_admits(listing: &Listing, stay: &StayRange) -> bool {
    if let Some(from) = listing.available_from
        && stay.start < from
    {
        return false;
    }
    if let Some(to) = listing.available_to
        && stay.end > to
    {
        return false;
    }
    true
}

/// Free calendar ranges for one property inside `window`: the query window
/// clamped to the declared bookable bounds, minus every ACCEPTED stay.
/// PENDING and CANCELLED bookings don't block the calendar.
pub fn free_ranges(ps: &PropertyState, window: &StayRange) -> Vec<StayRange> {
    let Some(base) = clamp_to_window(&ps.listing, window) else {
        return Vec::new();
    };

    let mut blocked: Vec<StayRange> = ps
        .accepted_overlapping(&base, None)
        .map(|b| b.stay)
        .collect();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_blocked(&blocked);

    subtract_days(&base, &blocked)
}

/// Intersect the query window with the declared bookable window; None when
/// they share no day.
fn clamp_to_window(listing: &Listing, window: &StayRange) -> Option<StayRange> {
    let start = match listing.available_from {
        Some(from) => window.start.max(from),
        None => window.start,
    };
    let end = match listing.available_to {
        Some(to) => window.end.min(to),
        None => window.end,
    };
    (start <= end).then(|| StayRange::new(start, end))
}

/// Merge sorted overlapping/adjacent day ranges into disjoint ranges.
/// Ranges are inclusive, so a range ending on the day before the next one
/// starts is contiguous blocked time and merges too.
pub fn merge_blocked(sorted: &[StayRange]) -> Vec<StayRange> {
    let mut merged: Vec<StayRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && last.end.succ_opt().is_some_and(|next| range.start <= next)
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Remove sorted disjoint blocked ranges from `base` with inclusive-day
/// arithmetic: a blocked range consumes its boundary days entirely, so the
/// free gap around it starts the day after it ends.
pub fn subtract_days(base: &StayRange, blocked: &[StayRange]) -> Vec<StayRange> {
    let mut result = Vec::new();
    let mut cursor = base.start;

    for r in blocked {
        if r.end < cursor {
            continue;
        }
        if r.start > base.end {
            break;
        }
        if r.start > cursor
            && let Some(gap_end) = r.start.pred_opt()
        {
            result.push(StayRange::new(cursor, gap_end));
        }
        cursor = match r.end.succ_opt() {
            Some(next) => next.max(cursor),
            // Blocked through the last representable day.
            None => return result,
        };
        if cursor > base.end {
            return result;
        }
    }

    if cursor <= base.end {
        result.push(StayRange::new(cursor, base.end));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn stay(start: &str, end: &str) -> StayRange {
        StayRange::new(d(start), d(end))
    }

    fn summer_listing() -> Listing {
        Listing {
            title: "Beach house".into(),
            city: "Santa Cruz".into(),
            state: "California".into(),
            country: "USA".into(),
            max_guests: 6,
            nightly_price: 25_000,
            amenities: vec![],
            available_from: Some(d("2024-06-01")),
            available_to: Some(d("2024-08-31")),
        }
    }

    fn unbounded_listing() -> Listing {
        Listing {
            available_from: None,
            available_to: None,
            ..summer_listing()
        }
    }

    fn make_property(listing: Listing, accepted: Vec<StayRange>) -> PropertyState {
        let mut ps = PropertyState::new(Ulid::new(), Ulid::new(), listing, 0);
        for s in accepted {
            ps.insert_booking(Booking {
                id: Ulid::new(),
                traveler_id: Ulid::new(),
                stay: s,
                guests: 2,
                status: BookingStatus::Accepted,
                created_at: 0,
            });
        }
        ps
    }

    // ── window_admits ─────────────────────────────────────

    #[test]
    fn window_admits_contained_stay() {
        let l = summer_listing();
        assert!(window_admits(&l, &stay("2024-07-01", "2024-07-10")));
    }

    #[test]
    fn window_rejects_straddling_start() {
        let l = summer_listing();
        assert!(!window_admits(&l, &stay("2024-05-01", "2024-06-05")));
    }

    #[test]
    fn window_rejects_straddling_end() {
        let l = summer_listing();
        assert!(!window_admits(&l, &stay("2024-08-25", "2024-09-02")));
    }

    #[test]
    fn window_admits_exact_boundaries() {
        let l = summer_listing();
        assert!(window_admits(&l, &stay("2024-06-01", "2024-08-31")));
    }

    #[test]
    fn window_absent_bounds_are_unbounded() {
        let l = unbounded_listing();
        assert!(window_admits(&l, &stay("1999-01-01", "2099-12-31")));

        let open_ended = Listing {
            available_to: None,
            ..summer_listing()
        };
        assert!(window_admits(&open_ended, &stay("2024-06-01", "2030-01-01")));
        assert!(!window_admits(&open_ended, &stay("2024-05-31", "2024-06-02")));
    }

    // ── merge_blocked ─────────────────────────────────────

    #[test]
    fn merge_blocked_overlapping() {
        let sorted = vec![
            stay("2024-07-01", "2024-07-05"),
            stay("2024-07-03", "2024-07-08"),
            stay("2024-07-20", "2024-07-22"),
        ];
        let merged = merge_blocked(&sorted);
        assert_eq!(
            merged,
            vec![stay("2024-07-01", "2024-07-08"), stay("2024-07-20", "2024-07-22")]
        );
    }

    #[test]
    fn merge_blocked_adjacent_days() {
        // Check-out July 5, next check-in July 6: contiguous blocked days.
        let sorted = vec![stay("2024-07-01", "2024-07-05"), stay("2024-07-06", "2024-07-10")];
        let merged = merge_blocked(&sorted);
        assert_eq!(merged, vec![stay("2024-07-01", "2024-07-10")]);
    }

    #[test]
    fn merge_blocked_gap_stays_split() {
        let sorted = vec![stay("2024-07-01", "2024-07-05"), stay("2024-07-07", "2024-07-10")];
        let merged = merge_blocked(&sorted);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_blocked_empty() {
        assert!(merge_blocked(&[]).is_empty());
    }

    // ── subtract_days ─────────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = stay("2024-07-01", "2024-07-31");
        let blocked = vec![stay("2024-08-10", "2024-08-15")];
        assert_eq!(subtract_days(&base, &blocked), vec![base]);
    }

    #[test]
    fn subtract_full_cover() {
        let base = stay("2024-07-10", "2024-07-15");
        let blocked = vec![stay("2024-07-01", "2024-07-31")];
        assert!(subtract_days(&base, &blocked).is_empty());
    }

    #[test]
    fn subtract_partial_left() {
        let base = stay("2024-07-01", "2024-07-31");
        let blocked = vec![stay("2024-06-25", "2024-07-10")];
        assert_eq!(
            subtract_days(&base, &blocked),
            vec![stay("2024-07-11", "2024-07-31")]
        );
    }

    #[test]
    fn subtract_partial_right() {
        let base = stay("2024-07-01", "2024-07-31");
        let blocked = vec![stay("2024-07-25", "2024-08-10")];
        assert_eq!(
            subtract_days(&base, &blocked),
            vec![stay("2024-07-01", "2024-07-24")]
        );
    }

    #[test]
    fn subtract_middle_punch() {
        let base = stay("2024-07-01", "2024-07-31");
        let blocked = vec![stay("2024-07-10", "2024-07-15")];
        assert_eq!(
            subtract_days(&base, &blocked),
            vec![stay("2024-07-01", "2024-07-09"), stay("2024-07-16", "2024-07-31")]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = stay("2024-07-01", "2024-07-31");
        let blocked = vec![
            stay("2024-07-05", "2024-07-08"),
            stay("2024-07-12", "2024-07-14"),
            stay("2024-07-28", "2024-07-30"),
        ];
        assert_eq!(
            subtract_days(&base, &blocked),
            vec![
                stay("2024-07-01", "2024-07-04"),
                stay("2024-07-09", "2024-07-11"),
                stay("2024-07-15", "2024-07-27"),
                stay("2024-07-31", "2024-07-31"),
            ]
        );
    }

    #[test]
    fn subtract_single_day_gaps_survive() {
        // Bookings either side of a lone free day.
        let base = stay("2024-07-01", "2024-07-09");
        let blocked = vec![stay("2024-07-01", "2024-07-04"), stay("2024-07-06", "2024-07-09")];
        assert_eq!(
            subtract_days(&base, &blocked),
            vec![stay("2024-07-05", "2024-07-05")]
        );
    }

    // ── free_ranges ───────────────────────────────────────

    #[test]
    fn free_ranges_open_calendar() {
        let ps = make_property(summer_listing(), vec![]);
        let free = free_ranges(&ps, &stay("2024-07-01", "2024-07-31"));
        assert_eq!(free, vec![stay("2024-07-01", "2024-07-31")]);
    }

    #[test]
    fn free_ranges_fragments_around_accepted() {
        let ps = make_property(
            summer_listing(),
            vec![stay("2024-07-10", "2024-07-15"), stay("2024-07-20", "2024-07-22")],
        );
        let free = free_ranges(&ps, &stay("2024-07-01", "2024-07-31"));
        assert_eq!(
            free,
            vec![
                stay("2024-07-01", "2024-07-09"),
                stay("2024-07-16", "2024-07-19"),
                stay("2024-07-23", "2024-07-31"),
            ]
        );
    }

    #[test]
    fn free_ranges_ignores_pending_and_cancelled() {
        let mut ps = make_property(summer_listing(), vec![]);
        for status in [BookingStatus::Pending, BookingStatus::Cancelled] {
            ps.insert_booking(Booking {
                id: Ulid::new(),
                traveler_id: Ulid::new(),
                stay: stay("2024-07-10", "2024-07-15"),
                guests: 2,
                status,
                created_at: 0,
            });
        }
        let free = free_ranges(&ps, &stay("2024-07-01", "2024-07-31"));
        assert_eq!(free, vec![stay("2024-07-01", "2024-07-31")]);
    }

    #[test]
    fn free_ranges_clamped_to_declared_window() {
        let ps = make_property(summer_listing(), vec![]);
        let free = free_ranges(&ps, &stay("2024-05-01", "2024-06-10"));
        assert_eq!(free, vec![stay("2024-06-01", "2024-06-10")]);
    }

    #[test]
    fn free_ranges_disjoint_window_is_empty() {
        let ps = make_property(summer_listing(), vec![]);
        assert!(free_ranges(&ps, &stay("2024-01-01", "2024-02-01")).is_empty());
    }

    #[test]
    fn free_ranges_booking_straddling_window_start() {
        let ps = make_property(unbounded_listing(), vec![stay("2024-06-28", "2024-07-03")]);
        let free = free_ranges(&ps, &stay("2024-07-01", "2024-07-10"));
        assert_eq!(free, vec![stay("2024-07-04", "2024-07-10")]);
    }
}
