use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{HeaderName, HeaderValue};

pub const REVISION_HEADER: HeaderName = HeaderName::from_static("x-listing-revision");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Species,
    Breeds,
    Customers,
    Doctors,
    Pets,
    Services,
    Appointments,
    Prescriptions,
    Dashboard,
}

impl Listing {
    const COUNT: usize = 9;

    fn index(self) -> usize {
        self as usize
    }
}

/// One counter per listing page. Writers bump the pages they affect; list
/// responses echo the counter so clients know when to refetch.
#[derive(Debug, Default)]
pub struct ListingRevisions {
    counters: [AtomicU64; Listing::COUNT],
}

impl ListingRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, listing: Listing) -> u64 {
        self.counters[listing.index()].load(Ordering::Acquire)
    }

    pub fn bump(&self, listings: &[Listing]) {
        for &l in listings {
            let rev = self.counters[l.index()].fetch_add(1, Ordering::AcqRel) + 1;
            tracing::debug!(listing = ?l, revision = rev, "listing revalidated");
        }
    }

    pub fn header(&self, listing: Listing) -> [(HeaderName, HeaderValue); 1] {
        [(REVISION_HEADER, HeaderValue::from(self.current(listing)))]
    }
}
