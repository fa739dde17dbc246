use std::collections::HashMap;

use parking_lot::Mutex;

use crate::common::types::FrameId;

const NIL: usize = usize::MAX;

struct Node {
    frame_id: FrameId,
    prev: usize,
    next: usize,
}

struct LruInner {
    /// Arena of list nodes; `free` recycles vacated indices. Sentinels at 0
    /// (head, MRU side) and 1 (tail, LRU side).
    nodes: Vec<Node>,
    free: Vec<usize>,
    map: HashMap<FrameId, usize>,
}

/// LRU policy over the evictable (unpinned) frames.
///
/// Doubly linked list plus a frame → node map, so insert/victim/erase are all
/// O(1). The list is an arena indexed by integers rather than shared
/// pointers, which sidesteps reference cycles and keeps erase constant-time.
pub struct LruReplacer {
    inner: Mutex<LruInner>,
}

const HEAD: usize = 0;
const TAIL: usize = 1;

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl LruReplacer {
    pub fn new() -> Self {
        let nodes = vec![
            Node { frame_id: 0, prev: NIL, next: TAIL },
            Node { frame_id: 0, prev: HEAD, next: NIL },
        ];
        Self {
            inner: Mutex::new(LruInner {
                nodes,
                free: Vec::new(),
                map: HashMap::new(),
            }),
        }
    }

    /// Mark `frame_id` evictable, moving it to the MRU end. Idempotent on
    /// re-insert.
    pub fn insert(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.map.get(&frame_id) {
            Self::unlink(&mut inner.nodes, idx);
            Self::link_front(&mut inner.nodes, idx);
            return;
        }
        let idx = match inner.free.pop() {
            Some(idx) => {
                inner.nodes[idx].frame_id = frame_id;
                idx
            }
            None => {
                inner.nodes.push(Node { frame_id, prev: NIL, next: NIL });
                inner.nodes.len() - 1
            }
        };
        Self::link_front(&mut inner.nodes, idx);
        inner.map.insert(frame_id, idx);
    }

    /// Remove and return the least recently used frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let idx = inner.nodes[TAIL].prev;
        if idx == HEAD {
            return None;
        }
        let frame_id = inner.nodes[idx].frame_id;
        Self::unlink(&mut inner.nodes, idx);
        inner.free.push(idx);
        inner.map.remove(&frame_id);
        Some(frame_id)
    }

    /// Remove `frame_id` if present; true when something was removed.
    pub fn erase(&self, frame_id: FrameId) -> bool {
        let mut inner = self.inner.lock();
        match inner.map.remove(&frame_id) {
            Some(idx) => {
                Self::unlink(&mut inner.nodes, idx);
                inner.free.push(idx);
                true
            }
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().map.len()
    }

    fn unlink(nodes: &mut [Node], idx: usize) {
        let (prev, next) = (nodes[idx].prev, nodes[idx].next);
        nodes[prev].next = next;
        nodes[next].prev = prev;
    }

    fn link_front(nodes: &mut [Node], idx: usize) {
        let first = nodes[HEAD].next;
        nodes[idx].prev = HEAD;
        nodes[idx].next = first;
        nodes[first].prev = idx;
        nodes[HEAD].next = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn victim_is_least_recently_used() {
        let replacer = LruReplacer::new();
        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(3);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn reinsert_moves_to_mru() {
        let replacer = LruReplacer::new();
        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(1); // 1 becomes most recently used
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn erase_removes_only_present() {
        let replacer = LruReplacer::new();
        replacer.insert(5);
        replacer.insert(6);
        assert!(replacer.erase(5));
        assert!(!replacer.erase(5));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(6));
    }

    #[test]
    fn arena_recycles_nodes() {
        let replacer = LruReplacer::new();
        for round in 0..100 {
            replacer.insert(round % 4);
        }
        assert_eq!(replacer.size(), 4);
        let mut victims = Vec::new();
        while let Some(v) = replacer.victim() {
            victims.push(v);
        }
        victims.sort_unstable();
        assert_eq!(victims, vec![0, 1, 2, 3]);
    }
}
