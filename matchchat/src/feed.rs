//! Swipe-candidate stream with undo.
//!
//! Candidates are paged from the search endpoint by `last_seen` cursor and
//! held in a [`BoundedUndoDeque`]. Liking or skipping records the decision
//! on the server, then advances; when few candidates remain ahead the next
//! page is fetched. An empty page marks the end of results until the filter
//! changes.

use std::sync::Arc;

use parking_lot::Mutex;

use matchchat_proto::message::UserId;
use matchchat_proto::profile::{CandidateProfile, SearchFilter};
use matchchat_proto::rest::{Status, SwipeAction};

use crate::api::{ApiError, ChatApi};
use crate::config::FeedConfig;
use crate::deque::BoundedUndoDeque;

struct FeedState {
    deque: BoundedUndoDeque<CandidateProfile>,
    filter: SearchFilter,
    last_seen: Option<UserId>,
    end_reached: bool,
    loading: bool,
    generation: u64,
}

/// Paged candidate feed for the swipe screen.
pub struct CandidateFeed<A: ChatApi> {
    api: Arc<A>,
    config: FeedConfig,
    state: Mutex<FeedState>,
}

impl<A: ChatApi> CandidateFeed<A> {
    /// Creates an empty feed; call [`load_more`](Self::load_more) to fill it.
    pub fn new(api: Arc<A>, config: FeedConfig, filter: SearchFilter) -> Self {
        Self {
            api,
            config,
            state: Mutex::new(FeedState {
                deque: BoundedUndoDeque::new(config.capacity, config.undo_buffer),
                filter,
                last_seen: None,
                end_reached: false,
                loading: false,
                generation: 0,
            }),
        }
    }

    /// Fetches the next page after the last seen candidate.
    ///
    /// Returns the number of candidates added; `0` when a load is already
    /// running, the end was reached, or the feed was reset meanwhile.
    ///
    /// # Errors
    ///
    /// Propagates the search failure; the feed stays usable.
    pub async fn load_more(&self) -> Result<usize, ApiError> {
        let (filter, last_seen, generation) = {
            let mut state = self.state.lock();
            if state.loading || state.end_reached {
                return Ok(0);
            }
            state.loading = true;
            (state.filter.clone(), state.last_seen, state.generation)
        };

        let result = self
            .api
            .search_candidates(&filter, last_seen, self.config.page_size)
            .await;

        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::debug!("candidate page for an old filter dropped");
            return Ok(0);
        }
        state.loading = false;
        let page = result?;
        let Some(last) = page.last() else {
            state.end_reached = true;
            tracing::info!("no more candidates");
            return Ok(0);
        };
        state.last_seen = Some(last.id);
        let added = page.len();
        state.deque.add_range(page);
        tracing::debug!(added, held = state.deque.len(), "candidates loaded");
        Ok(added)
    }

    /// Likes the current candidate and advances.
    ///
    /// Returns `None` when there is no current candidate.
    ///
    /// # Errors
    ///
    /// The swipe request failed; the cursor does not move.
    pub async fn like(&self) -> Result<Option<Status>, ApiError> {
        self.decide(SwipeAction::Like).await
    }

    /// Skips the current candidate and advances.
    ///
    /// # Errors
    ///
    /// As [`like`](Self::like).
    pub async fn skip(&self) -> Result<Option<Status>, ApiError> {
        self.decide(SwipeAction::Dislike).await
    }

    async fn decide(&self, action: SwipeAction) -> Result<Option<Status>, ApiError> {
        let target = self.state.lock().deque.current().map(|c| c.id);
        let Some(target) = target else {
            return Ok(None);
        };
        let status = self.api.swipe(target, action).await?;

        let prefetch = {
            let mut state = self.state.lock();
            if state.deque.current().map(|c| c.id) == Some(target) {
                state.deque.move_next();
            }
            state.deque.current().is_none()
                || state.deque.remaining_ahead() < self.config.prefetch_threshold
        };
        if prefetch {
            if let Err(e) = self.load_more().await {
                tracing::warn!(error = %e, "candidate prefetch failed");
            }
        }
        Ok(Some(status))
    }

    /// Steps back to the previous candidate. Returns `false` at the front.
    pub fn undo(&self) -> bool {
        self.state.lock().deque.move_previous()
    }

    /// The candidate on screen.
    #[must_use]
    pub fn current(&self) -> Option<CandidateProfile> {
        self.state.lock().deque.current().cloned()
    }

    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.state.lock().deque.has_previous()
    }

    #[must_use]
    pub fn remaining_ahead(&self) -> usize {
        self.state.lock().deque.remaining_ahead()
    }

    /// Whether the search returned an empty page.
    #[must_use]
    pub fn is_end_reached(&self) -> bool {
        self.state.lock().end_reached
    }

    /// Replaces the filter, drops every held candidate and loads the first
    /// page of the new results.
    ///
    /// # Errors
    ///
    /// Propagates the search failure.
    pub async fn apply_filter(&self, filter: SearchFilter) -> Result<usize, ApiError> {
        {
            let mut state = self.state.lock();
            state.filter = filter;
            state.deque.clear();
            state.last_seen = None;
            state.end_reached = false;
            state.loading = false;
            state.generation += 1;
        }
        self.load_more().await
    }
}
