//! Cursor-based pagination tracking for the services endpoint.

use pushnote_protocol::{ServiceId, ServiceLike};

/// Progress through the remote services list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationState {
    /// Nothing fetched yet.
    Initial,
    /// At least one full page fetched; more may follow.
    PartiallyPaginated {
        /// Id of the last service of the latest page.
        last_id: ServiceId,
    },
    /// A short page was seen; no further pages exist.
    Paginated,
}

impl PaginationState {
    /// Whether another page may be fetched. Offline mode only permits the
    /// first page.
    pub fn allows_pagination(&self, offline_mode: bool) -> bool {
        match self {
            PaginationState::Initial => true,
            PaginationState::Paginated => false,
            PaginationState::PartiallyPaginated { .. } => !offline_mode,
        }
    }
}

/// Tracks pagination state transitions.
///
/// `Paginated` is absorbing until [`PaginationTracker::reset`] is called.
#[derive(Debug, Clone)]
pub struct PaginationTracker {
    limit: u32,
    state: PaginationState,
}

impl PaginationTracker {
    /// Creates a tracker for pages of `limit` items.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: PaginationState::Initial,
        }
    }

    /// Current state.
    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    /// Page size.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Records the latest fetched page.
    pub fn update_state<T: ServiceLike>(&mut self, latest_page: &[T]) {
        if self.limit == 0 || self.state == PaginationState::Paginated {
            return;
        }
        match latest_page.last() {
            Some(last) if latest_page.len() >= self.limit as usize => {
                self.state = PaginationState::PartiallyPaginated {
                    last_id: last.id().clone(),
                };
            }
            _ => self.state = PaginationState::Paginated,
        }
    }

    /// Cursor for the next page. `None` means either "fetch the first page"
    /// or "no more pages"; use [`Self::is_fully_paginated`] to tell them apart.
    pub fn next_page_cursor(&self) -> Option<&ServiceId> {
        match &self.state {
            PaginationState::PartiallyPaginated { last_id } => Some(last_id),
            PaginationState::Initial | PaginationState::Paginated => None,
        }
    }

    /// True once a short page has been seen.
    pub fn is_fully_paginated(&self) -> bool {
        self.state == PaginationState::Paginated
    }

    /// True before any page has been fetched.
    pub fn is_initial(&self) -> bool {
        self.state == PaginationState::Initial
    }

    /// Whether another page may be fetched.
    pub fn allows_pagination(&self, offline_mode: bool) -> bool {
        self.state.allows_pagination(offline_mode)
    }

    /// Starts over, for an explicit resynchronization.
    pub fn reset(&mut self) {
        self.state = PaginationState::Initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushnote_protocol::Snippet;

    fn page(range: std::ops::Range<i64>) -> Vec<Snippet> {
        range.map(|i| Snippet::new(i, format!("s{:03}", i))).collect()
    }

    #[test]
    fn full_page_moves_to_partially_paginated() {
        let mut tracker = PaginationTracker::new(25);
        tracker.update_state(&page(0..25));
        assert_eq!(
            tracker.state(),
            &PaginationState::PartiallyPaginated {
                last_id: ServiceId::Int(24)
            }
        );
        assert_eq!(tracker.next_page_cursor(), Some(&ServiceId::Int(24)));
    }

    #[test]
    fn short_or_empty_page_is_terminal() {
        let mut tracker = PaginationTracker::new(25);
        tracker.update_state(&page(0..3));
        assert!(tracker.is_fully_paginated());
        assert_eq!(tracker.next_page_cursor(), None);

        let mut tracker = PaginationTracker::new(25);
        tracker.update_state::<Snippet>(&[]);
        assert!(tracker.is_fully_paginated());
    }

    #[test]
    fn paginated_is_absorbing_until_reset() {
        let mut tracker = PaginationTracker::new(2);
        tracker.update_state(&page(0..1));
        tracker.update_state(&page(1..3));
        assert!(tracker.is_fully_paginated());

        tracker.reset();
        assert!(tracker.is_initial());
        tracker.update_state(&page(1..3));
        assert!(!tracker.is_fully_paginated());
    }

    #[test]
    fn zero_limit_is_a_no_op() {
        let mut tracker = PaginationTracker::new(0);
        tracker.update_state(&page(0..5));
        assert!(tracker.is_initial());
    }

    #[test]
    fn allows_pagination_policy() {
        let mut tracker = PaginationTracker::new(2);
        assert!(tracker.allows_pagination(true));

        tracker.update_state(&page(0..2));
        assert!(tracker.allows_pagination(false));
        assert!(!tracker.allows_pagination(true));

        tracker.update_state(&page(2..3));
        assert!(!tracker.allows_pagination(false));
    }
}
