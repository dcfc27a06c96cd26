//! Immutable extracted slices of trace history and their call-tree form.
//!
//! A [`Snapshot`] is a copy of a contiguous run of ring-buffer words,
//! materialized at extraction time and safe to hand to any thread. It can
//! replay itself as `(method id, time, enter)` triples for report writers,
//! or reconstruct the call tree that produced it via [`Snapshot::build_tree`].

use std::sync::Arc;

use smallvec::SmallVec;

use crate::record::Record;

/// Id of the synthetic root node wrapping the top-level spans of a tree.
pub const ROOT_ID: i32 = -1;

/// An immutable slice of records between two marks.
///
/// Cloning is cheap (shared backing storage). An invalid extraction is
/// represented by the canonical empty snapshot rather than an error: stale
/// ranges are an expected, frequent condition under load.
#[derive(Clone, Debug)]
pub struct Snapshot {
    words: Arc<[u64]>,
}

impl Snapshot {
    /// The canonical empty snapshot.
    pub fn empty() -> Self {
        Self {
            words: Arc::from([]),
        }
    }

    pub(crate) fn from_words(words: Vec<u64>) -> Self {
        Self {
            words: words.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.words.get(index).copied().map(Record::from_raw)
    }

    /// Records in write order.
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.words.iter().copied().map(Record::from_raw)
    }

    /// Whether this snapshot is a usable span of history.
    ///
    /// Requires a non-empty slice whose first record is an enter and whose
    /// first timestamp does not exceed its last. A first record that is an
    /// exit is rejected wholesale: it may be a torn read from a racing
    /// writer, and the conservative rule is to discard rather than guess.
    pub fn is_available(&self) -> bool {
        let Some(first) = self.get(0) else {
            return false;
        };
        if !first.is_enter() {
            return false;
        }
        if self.len() > 1 {
            let last = Record::from_raw(self.words[self.len() - 1]);
            if first.time_ms() > last.time_ms() {
                return false;
            }
        }
        true
    }

    /// Resolve to self when available, otherwise the empty snapshot.
    ///
    /// Report paths call this once at capture time so downstream consumers
    /// only ever see an empty or a well-formed snapshot.
    pub fn available(self) -> Self {
        if self.is_available() { self } else { Self::empty() }
    }

    /// Reconstruct the call tree for this snapshot.
    ///
    /// Enters push open frames, exits close them into completed nodes.
    /// Frames still open when the records run out were in flight when the
    /// history was captured; they are closed artificially at `candidate_ms`
    /// (typically "now") and flagged `is_complete = false`. An unavailable
    /// snapshot yields a childless incomplete root.
    pub fn build_tree(&self, candidate_ms: i64) -> Node {
        let mut root = Node {
            id: ROOT_ID,
            start_ms: candidate_ms,
            end_ms: candidate_ms,
            is_complete: false,
            children: Vec::new(),
        };
        if !self.is_available() {
            return root;
        }

        // Open frames: the enter record and the children completed under it.
        let mut stack: SmallVec<[(Record, Vec<Node>); 16]> = SmallVec::new();
        let mut top_level: Vec<Node> = Vec::new();

        for record in self.iter() {
            if record.is_enter() {
                stack.push((record, Vec::new()));
            } else {
                // An exit with no open frame belongs to an enter outside the
                // captured window; degrade by dropping it.
                let Some((open, children)) = stack.pop() else {
                    continue;
                };
                let node = Node {
                    id: open.id() as i32,
                    start_ms: open.time_ms(),
                    end_ms: record.time_ms(),
                    is_complete: true,
                    children,
                };
                match stack.last_mut() {
                    Some((_, siblings)) => siblings.push(node),
                    None => top_level.push(node),
                }
            }
        }

        while let Some((open, children)) = stack.pop() {
            let node = Node {
                id: open.id() as i32,
                start_ms: open.time_ms(),
                end_ms: candidate_ms,
                is_complete: false,
                children,
            };
            match stack.last_mut() {
                Some((_, siblings)) => siblings.push(node),
                None => top_level.push(node),
            }
        }

        if let (Some(first), Some(last)) = (top_level.first(), top_level.last()) {
            root.start_ms = first.start_ms;
            root.end_ms = last.end_ms;
            root.is_complete = last.is_complete;
        }
        root.children = top_level;
        root
    }
}

/// One reconstructed call span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: i32,
    pub start_ms: i64,
    pub end_ms: i64,
    /// False when the span was still open at the snapshot's end boundary
    /// and had to be closed artificially.
    pub is_complete: bool,
    pub children: Vec<Node>,
}

impl Node {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}
