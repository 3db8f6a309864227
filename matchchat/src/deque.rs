//! Fixed-capacity, doubly-navigable sequence with a protected undo zone.
//!
//! [`BoundedUndoDeque`] backs consume-with-undo streams such as the swipe
//! candidate feed: items are appended in pages, a cursor marks the current
//! item, and the front is trimmed as the cursor moves on. The `undo_buffer`
//! items directly behind the cursor are never evicted, so moving back is
//! always possible for at least that many steps even when the deque has
//! temporarily grown beyond its capacity.

use std::collections::VecDeque;

/// Bounded deque with a cursor and an eviction-protected undo zone.
///
/// The cursor ranges over `0..=len`; `len` means the stream is exhausted
/// (no current item). Appending while exhausted makes the first appended
/// item current.
#[derive(Debug, Clone)]
pub struct BoundedUndoDeque<T> {
    items: VecDeque<T>,
    cursor: usize,
    capacity: usize,
    undo_buffer: usize,
}

impl<T> BoundedUndoDeque<T> {
    /// Creates an empty deque.
    #[must_use]
    pub fn new(capacity: usize, undo_buffer: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            cursor: 0,
            capacity,
            undo_buffer,
        }
    }

    /// Appends `items` at the back, then trims the front while over
    /// capacity and outside the undo zone.
    pub fn add_range(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.extend(items);
        self.trim_start();
    }

    /// Prepends `items` (keeping their order) and trims the back while over
    /// capacity. Only items strictly ahead of the cursor are trimmed.
    pub fn add_to_start(&mut self, items: impl IntoIterator<Item = T>) {
        let batch: Vec<T> = items.into_iter().collect();
        self.cursor += batch.len();
        for item in batch.into_iter().rev() {
            self.items.push_front(item);
        }
        self.trim_end();
    }

    /// The item under the cursor, `None` when exhausted or empty.
    #[must_use]
    pub fn current(&self) -> Option<&T> {
        self.items.get(self.cursor)
    }

    /// Advances the cursor. Returns whether it now rests on an item.
    ///
    /// Advancing past the last item leaves the deque exhausted; a later
    /// [`add_range`](Self::add_range) resumes from the first new item.
    pub fn move_next(&mut self) -> bool {
        if self.cursor < self.items.len() {
            self.cursor += 1;
            self.trim_start();
        }
        self.cursor < self.items.len()
    }

    /// Moves the cursor back one item. Returns `false` at the front.
    pub fn move_previous(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    /// Number of items strictly after the cursor.
    #[must_use]
    pub fn remaining_ahead(&self) -> usize {
        self.items.len().saturating_sub(self.cursor + 1)
    }

    /// Whether [`move_previous`](Self::move_previous) would succeed.
    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.cursor > 0
    }

    /// Index of the cursor from the front.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor
    }

    /// The last item, if any.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterates front to back.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Number of items held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the deque holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes every item and rewinds the cursor.
    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = 0;
    }

    fn trim_start(&mut self) {
        while self.items.len() > self.capacity && self.cursor > self.undo_buffer {
            self.items.pop_front();
            self.cursor -= 1;
        }
    }

    fn trim_end(&mut self) {
        while self.items.len() > self.capacity && self.items.len() > self.cursor + 1 {
            self.items.pop_back();
        }
    }
}
