//! Text document model.
//!
//! A [`Document`] holds the authoritative text buffer for one editing session
//! together with a revision counter. Every mutation goes through
//! [`Document::apply`], which bumps the revision by exactly one and records
//! the operation so the buffer can always be rebuilt by replaying history.
//!
//! Positions and lengths count Unicode scalar values (`char`s), not bytes, so
//! peers agree on offsets regardless of encoding.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// One atomic document mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditOp {
    /// Insert `text` before the character at `position`.
    Insert {
        /// Character index to insert at.
        position: usize,
        /// Text to insert.
        text: String,
    },
    /// Remove `length` characters starting at `position`.
    Delete {
        /// Character index of the first removed character.
        position: usize,
        /// Number of characters to remove.
        length: usize,
    },
    /// Remove `length` characters at `position` and insert `text` in their place.
    Replace {
        /// Character index of the replaced range.
        position: usize,
        /// Number of characters replaced.
        length: usize,
        /// Replacement text.
        text: String,
    },
}

impl EditOp {
    /// Build an insert.
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        EditOp::Insert {
            position,
            text: text.into(),
        }
    }

    /// Build a delete.
    pub fn delete(position: usize, length: usize) -> Self {
        EditOp::Delete { position, length }
    }

    /// Build a replace.
    pub fn replace(position: usize, length: usize, text: impl Into<String>) -> Self {
        EditOp::Replace {
            position,
            length,
            text: text.into(),
        }
    }

    /// Build the narrowest variant for a `(position, removed, inserted)` triple.
    pub(crate) fn from_parts(position: usize, length: usize, text: String) -> Self {
        match (length, text.is_empty()) {
            (0, _) => EditOp::Insert { position, text },
            (_, true) => EditOp::Delete { position, length },
            _ => EditOp::Replace {
                position,
                length,
                text,
            },
        }
    }

    /// Character index where the edit starts.
    pub fn position(&self) -> usize {
        match self {
            EditOp::Insert { position, .. }
            | EditOp::Delete { position, .. }
            | EditOp::Replace { position, .. } => *position,
        }
    }

    /// Number of characters removed by the edit.
    pub fn deleted_len(&self) -> usize {
        match self {
            EditOp::Insert { .. } => 0,
            EditOp::Delete { length, .. } | EditOp::Replace { length, .. } => *length,
        }
    }

    /// Text inserted by the edit (empty for deletes).
    pub fn inserted_text(&self) -> &str {
        match self {
            EditOp::Insert { text, .. } | EditOp::Replace { text, .. } => text,
            EditOp::Delete { .. } => "",
        }
    }

    /// Number of characters inserted by the edit.
    pub fn inserted_len(&self) -> usize {
        self.inserted_text().chars().count()
    }

    /// True when applying the edit would not change any buffer.
    pub fn is_noop(&self) -> bool {
        self.deleted_len() == 0 && self.inserted_text().is_empty()
    }

    /// Compute a single edit that turns `old` into `new`.
    ///
    /// Uses the common prefix and suffix of the two strings so that only the
    /// changed middle is replaced. Returns `None` when the strings are equal.
    pub fn diff(old: &str, new: &str) -> Option<EditOp> {
        if old == new {
            return None;
        }

        let old_chars: Vec<char> = old.chars().collect();
        let new_chars: Vec<char> = new.chars().collect();

        let common_prefix = old_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();

        // Suffix must not overlap the prefix on either side.
        let remaining_old = old_chars.len() - common_prefix;
        let remaining_new = new_chars.len() - common_prefix;
        let common_suffix = old_chars[common_prefix..]
            .iter()
            .rev()
            .zip(new_chars[common_prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(remaining_old.min(remaining_new))
            .count();

        let delete_len = old_chars.len() - common_suffix - common_prefix;
        let insert: String = new_chars[common_prefix..new_chars.len() - common_suffix]
            .iter()
            .collect();

        Some(EditOp::from_parts(common_prefix, delete_len, insert))
    }
}

/// A `(buffer, revision)` pair, used for reads and for resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Full buffer content.
    pub buffer: String,
    /// Revision the buffer corresponds to.
    pub revision: u64,
}

/// The authoritative text buffer and its revision counter.
#[derive(Debug, Clone, Default)]
pub struct Document {
    buffer: String,
    char_len: usize,
    revision: u64,
    /// State the history is replayed from (empty at revision 0 unless reset).
    base: Snapshot,
    history: Vec<EditOp>,
}

impl Document {
    /// Create an empty document at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document whose base is the given snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut doc = Self::default();
        doc.reset(snapshot);
        doc
    }

    /// Rebuild a document by applying `ops` to an empty buffer, in order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OutOfBounds`] if any op does not fit the buffer it
    /// is applied to.
    pub fn replay<'a>(ops: impl IntoIterator<Item = &'a EditOp>) -> Result<Self> {
        let mut doc = Self::new();
        for op in ops {
            doc.apply(op)?;
        }
        Ok(doc)
    }

    /// Apply an edit and return the new revision.
    ///
    /// On error nothing changes: buffer, revision, and history stay as they
    /// were.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OutOfBounds`] when `position` or
    /// `position + length` exceeds the buffer length.
    pub fn apply(&mut self, op: &EditOp) -> Result<u64> {
        let position = op.position();
        let length = op.deleted_len();

        let in_bounds = position
            .checked_add(length)
            .is_some_and(|end| end <= self.char_len);
        if !in_bounds {
            return Err(SyncError::OutOfBounds {
                position,
                length,
                buffer_len: self.char_len,
            });
        }

        let start = byte_offset(&self.buffer, position);
        let end = start + byte_offset(&self.buffer[start..], length);
        let text = op.inserted_text();
        self.buffer.replace_range(start..end, text);
        self.char_len = self.char_len - length + text.chars().count();

        self.revision += 1;
        self.history.push(op.clone());
        log::trace!(
            "[Document] applied {:?} -> revision {} ({} chars)",
            op,
            self.revision,
            self.char_len
        );
        Ok(self.revision)
    }

    /// Current buffer and revision.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            buffer: self.buffer.clone(),
            revision: self.revision,
        }
    }

    /// Borrow the current buffer.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Buffer length in characters.
    pub fn len_chars(&self) -> usize {
        self.char_len
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    /// Ops applied since [`Document::base`], oldest first.
    pub fn history(&self) -> &[EditOp] {
        &self.history
    }

    /// Snapshot the history is replayed from.
    pub fn base(&self) -> &Snapshot {
        &self.base
    }

    /// Rebuild this document from its base by replaying its history.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OutOfBounds`] if the history does not replay,
    /// which would mean the document was corrupted.
    pub fn rebuild(&self) -> Result<Self> {
        let mut doc = Self::from_snapshot(self.base.clone());
        for op in &self.history {
            doc.apply(op)?;
        }
        Ok(doc)
    }

    /// Discard all state and adopt `snapshot` as the new base.
    ///
    /// Only used by resync, where a peer's state replaces ours wholesale.
    pub fn reset(&mut self, snapshot: Snapshot) {
        self.char_len = snapshot.buffer.chars().count();
        self.buffer = snapshot.buffer.clone();
        self.revision = snapshot.revision;
        self.base = snapshot;
        self.history.clear();
    }
}

/// Byte offset of the `char_idx`-th character of `s` (or `s.len()` past the end).
fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert_eq!(doc.text(), "");
        assert_eq!(doc.revision(), 0);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_apply_variants() {
        let mut doc = Document::new();
        assert_eq!(doc.apply(&EditOp::insert(0, "hello world")).unwrap(), 1);
        assert_eq!(doc.apply(&EditOp::delete(5, 6)).unwrap(), 2);
        assert_eq!(doc.text(), "hello");
        assert_eq!(doc.apply(&EditOp::replace(0, 1, "J")).unwrap(), 3);
        assert_eq!(doc.text(), "Jello");
        assert_eq!(doc.len_chars(), 5);
    }

    #[test]
    fn test_apply_counts_chars_not_bytes() {
        let mut doc = Document::new();
        doc.apply(&EditOp::insert(0, "héllo wörld")).unwrap();
        doc.apply(&EditOp::replace(7, 1, "o")).unwrap();
        assert_eq!(doc.text(), "héllo world");
        doc.apply(&EditOp::delete(1, 1)).unwrap();
        assert_eq!(doc.text(), "hllo world");
        assert_eq!(doc.len_chars(), 10);
    }

    #[test]
    fn test_out_of_bounds_leaves_document_unchanged() {
        let mut doc = Document::new();
        doc.apply(&EditOp::insert(0, "abc")).unwrap();

        let err = doc.apply(&EditOp::insert(4, "x")).unwrap_err();
        assert!(matches!(
            err,
            SyncError::OutOfBounds {
                position: 4,
                length: 0,
                buffer_len: 3
            }
        ));
        assert!(doc.apply(&EditOp::delete(2, 2)).is_err());
        assert!(doc.apply(&EditOp::replace(usize::MAX, 2, "x")).is_err());

        assert_eq!(doc.text(), "abc");
        assert_eq!(doc.revision(), 1);
        assert_eq!(doc.history().len(), 1);
    }

    #[test]
    fn test_insert_at_end_is_in_bounds() {
        let mut doc = Document::new();
        doc.apply(&EditOp::insert(0, "abc")).unwrap();
        doc.apply(&EditOp::insert(3, "d")).unwrap();
        assert_eq!(doc.text(), "abcd");
    }

    #[test]
    fn test_replay_reproduces_buffer() {
        let mut doc = Document::new();
        doc.apply(&EditOp::insert(0, "fn main() {}")).unwrap();
        doc.apply(&EditOp::insert(11, "\n    println!();\n")).unwrap();
        doc.apply(&EditOp::replace(3, 4, "start")).unwrap();

        let replayed = Document::replay(doc.history()).unwrap();
        assert_eq!(replayed.snapshot(), doc.snapshot());
        assert_eq!(doc.rebuild().unwrap().snapshot(), doc.snapshot());
    }

    #[test]
    fn test_reset_adopts_snapshot_as_base() {
        let mut doc = Document::new();
        doc.apply(&EditOp::insert(0, "local")).unwrap();

        doc.reset(Snapshot {
            buffer: "remote".to_string(),
            revision: 9,
        });
        assert_eq!(doc.text(), "remote");
        assert_eq!(doc.revision(), 9);
        assert!(doc.history().is_empty());

        doc.apply(&EditOp::insert(6, "!")).unwrap();
        assert_eq!(doc.revision(), 10);
        assert_eq!(doc.rebuild().unwrap().text(), "remote!");
    }

    #[test]
    fn test_diff_middle_change() {
        let op = EditOp::diff("let x = 1;", "let y = 1;").unwrap();
        assert_eq!(op, EditOp::replace(4, 1, "y"));
    }

    #[test]
    fn test_diff_append_and_truncate() {
        assert_eq!(
            EditOp::diff("hello", "hello world"),
            Some(EditOp::insert(5, " world"))
        );
        assert_eq!(EditOp::diff("hello world", "hello"), Some(EditOp::delete(5, 6)));
        assert_eq!(EditOp::diff("same", "same"), None);
    }

    #[test]
    fn test_diff_repeated_chars_does_not_overlap() {
        let op = EditOp::diff("aaa", "aaaa").unwrap();
        let mut doc = Document::new();
        doc.apply(&EditOp::insert(0, "aaa")).unwrap();
        doc.apply(&op).unwrap();
        assert_eq!(doc.text(), "aaaa");
    }

    #[test]
    fn test_from_parts_picks_narrowest_variant() {
        assert_eq!(
            EditOp::from_parts(2, 0, "x".to_string()),
            EditOp::insert(2, "x")
        );
        assert_eq!(EditOp::from_parts(2, 3, String::new()), EditOp::delete(2, 3));
        assert_eq!(
            EditOp::from_parts(2, 3, "x".to_string()),
            EditOp::replace(2, 3, "x")
        );
        assert!(EditOp::from_parts(2, 0, String::new()).is_noop());
    }
}
