//! # Expiration Queue
//!
//! Binary min-heap keyed by rounded death time in milliseconds.
//!
//! Entries sharing an exact death time are coalesced into one node, so a
//! burst of N particles emitted in the same millisecond costs one heap node
//! instead of N. A time → node map finds an existing node in O(1).
//!
//! Popped member buffers are swapped with the caller's scratch buffer and
//! retired nodes keep their buffers, so steady-state operation performs no
//! heap allocation.

use std::collections::HashMap;

use crate::time::FAR_FUTURE_MS;

/// Initial number of nodes reserved by [`ExpirationQueue::new`].
const INITIAL_NODES: usize = 16;

/// One heap node: every member scheduled for the same millisecond.
#[derive(Debug)]
struct Node<T> {
    time_ms: i64,
    members: Vec<T>,
}

/// Min-heap of scheduled liveness checks with coalescing.
///
/// # Preconditions
///
/// An entry must not be inserted while it is already scheduled. This is not
/// checked; a double insert yields a duplicate member that later pops twice.
#[derive(Debug)]
pub struct ExpirationQueue<T> {
    /// Backing nodes. Only `nodes[..len]` belong to the heap; the tail holds
    /// retired nodes whose buffers are reused.
    nodes: Vec<Node<T>>,
    /// Logical heap size.
    len: usize,
    /// Scheduled time → heap position.
    lookup: HashMap<i64, usize>,
    /// Total members across live nodes.
    member_count: usize,
}

impl<T> Default for ExpirationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ExpirationQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::with_capacity(INITIAL_NODES),
            len: 0,
            lookup: HashMap::with_capacity(INITIAL_NODES),
            member_count: 0,
        }
    }

    /// Number of heap nodes (distinct scheduled times).
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is scheduled.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of scheduled members across all nodes.
    #[inline]
    #[must_use]
    pub const fn member_count(&self) -> usize {
        self.member_count
    }

    /// Smallest scheduled time, or [`FAR_FUTURE_MS`] when empty.
    #[inline]
    #[must_use]
    pub fn top(&self) -> i64 {
        if self.len == 0 {
            FAR_FUTURE_MS
        } else {
            self.nodes[0].time_ms
        }
    }

    /// Schedules `member` at `time_ms`.
    ///
    /// Joins the existing node for that time if there is one; otherwise
    /// appends a node and sifts it up.
    pub fn insert_timed(&mut self, member: T, time_ms: i64) {
        self.member_count += 1;

        if let Some(&pos) = self.lookup.get(&time_ms) {
            self.nodes[pos].members.push(member);
            return;
        }

        if self.len == self.nodes.len() {
            if self.nodes.len() == self.nodes.capacity() {
                // Double the backing capacity.
                self.nodes.reserve(self.nodes.capacity().max(1));
            }
            self.nodes.push(Node {
                time_ms,
                members: Vec::new(),
            });
        } else {
            let node = &mut self.nodes[self.len];
            node.time_ms = time_ms;
            node.members.clear();
        }
        self.nodes[self.len].members.push(member);

        let pos = self.len;
        self.len += 1;
        self.lookup.insert(time_ms, pos);
        self.sift_up(pos);
    }

    /// Removes the earliest node, moving its members into `out`.
    ///
    /// `out` is cleared first. Returns the node's time, or `None` if the
    /// queue was empty (in which case `out` is left empty).
    pub fn pop_into(&mut self, out: &mut Vec<T>) -> Option<i64> {
        out.clear();
        if self.len == 0 {
            return None;
        }

        let time_ms = self.nodes[0].time_ms;
        // The root takes over the caller's empty buffer.
        std::mem::swap(out, &mut self.nodes[0].members);
        self.member_count -= out.len();
        self.lookup.remove(&time_ms);
        self.len -= 1;

        if self.len > 0 {
            self.nodes.swap(0, self.len);
            self.lookup.insert(self.nodes[0].time_ms, 0);
            self.sift_down(0);
        }

        Some(time_ms)
    }

    /// Removes the earliest node and returns its members.
    ///
    /// Allocates a fresh buffer; hot paths use [`ExpirationQueue::pop_into`].
    #[must_use]
    pub fn pop(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        self.pop_into(&mut out);
        out
    }

    /// Drops every scheduled entry. Backing capacity is retained.
    pub fn clear(&mut self) {
        for node in &mut self.nodes[..self.len] {
            node.members.clear();
        }
        self.len = 0;
        self.member_count = 0;
        self.lookup.clear();
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.nodes[parent].time_ms <= self.nodes[pos].time_ms {
                break;
            }
            self.swap_nodes(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            if left >= self.len {
                break;
            }
            let right = left + 1;
            let smaller = if right < self.len && self.nodes[right].time_ms < self.nodes[left].time_ms
            {
                right
            } else {
                left
            };
            if self.nodes[pos].time_ms <= self.nodes[smaller].time_ms {
                break;
            }
            self.swap_nodes(pos, smaller);
            pos = smaller;
        }
    }

    fn swap_nodes(&mut self, a: usize, b: usize) {
        self.nodes.swap(a, b);
        self.lookup.insert(self.nodes[a].time_ms, a);
        self.lookup.insert(self.nodes[b].time_ms, b);
    }
}
