//! Position rebasing and coalescing of edits.
//!
//! Every [`EditOp`] is viewed as "replace the character range
//! `[position, position + length)` with `text`". Two edits made against the
//! same buffer are concurrent; [`transform`] rewrites one so it can be
//! applied after the other, and applying either order converges:
//!
//! ```text
//! apply(apply(s, a), transform(o, a, Order::Before))
//!     == apply(apply(s, o), transform(a, o, Order::After))
//! ```
//!
//! Resolution rules:
//! - two inserts at the same position: the op ordered first ends up on the left
//! - two edits replacing the identical range: the op ordered last wins
//! - an edit whose whole range was consumed by the other is dropped

use crate::document::EditOp;

/// Where the op being transformed sits relative to the op it is transformed
/// against, in the order the peers agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// The op came first.
    Before,
    /// The op came last.
    After,
}

impl Order {
    /// The order seen from the other op.
    pub fn flip(self) -> Self {
        match self {
            Order::Before => Order::After,
            Order::After => Order::Before,
        }
    }
}

/// Rewrite `op` so it applies on top of `applied`.
///
/// Both ops must have been computed against the same buffer. Returns `None`
/// when `applied` removed every character `op` addressed and `op` loses the
/// conflict.
pub fn transform(op: &EditOp, applied: &EditOp, order: Order) -> Option<EditOp> {
    let (p, d) = (op.position(), op.deleted_len());
    let (q, e) = (applied.position(), applied.deleted_len());
    let inserted = applied.inserted_len();
    let op_end = p + d;
    let applied_end = q + e;
    let text = op.inserted_text().to_string();

    // Two pure inserts at the same spot.
    if d == 0 && e == 0 && p == q {
        return match order {
            Order::Before => Some(op.clone()),
            Order::After => Some(EditOp::from_parts(p + inserted, 0, text)),
        };
    }

    if op_end <= q {
        return Some(op.clone());
    }
    if p >= applied_end {
        return Some(EditOp::from_parts(p - e + inserted, d, text));
    }

    let applied_inside = p <= q && applied_end <= op_end;
    let op_inside = q <= p && op_end <= applied_end;

    match (applied_inside, op_inside) {
        // Identical ranges.
        (true, true) => match order {
            Order::Before => None,
            Order::After => Some(EditOp::from_parts(p, inserted, text)),
        },
        // `op` swallows `applied`, including whatever it inserted.
        (true, false) => Some(EditOp::from_parts(p, d - e + inserted, text)),
        (false, true) => None,
        // Partial overlap, `op` starts first: keep only its leading part.
        (false, false) if p < q => Some(EditOp::from_parts(p, q - p, text)),
        // Partial overlap, `applied` starts first: keep only the trailing part.
        (false, false) => Some(EditOp::from_parts(q + inserted, op_end - applied_end, text)),
    }
}

/// Merge `next` into `prev`, where `next` was computed against the buffer
/// produced by `prev`.
///
/// Only succeeds when `next` touches the region `prev` produced (starts
/// inside or at the edge of it, or reaches into it from the left), which is
/// the shape of continuous typing and backspacing. The result applied to the
/// buffer `prev` was computed against equals applying `prev` then `next`.
pub fn coalesce(prev: &EditOp, next: &EditOp) -> Option<EditOp> {
    let (p, d) = (prev.position(), prev.deleted_len());
    let prev_chars: Vec<char> = prev.inserted_text().chars().collect();
    let region_end = p + prev_chars.len();
    let (q, e) = (next.position(), next.deleted_len());
    let next_end = q + e;

    if q > region_end || next_end < p {
        return None;
    }

    // Slice of `prev`'s inserted text that `next` removes.
    let cut_start = q.max(p) - p;
    let cut_end = (next_end.min(region_end) - p).max(cut_start);
    // Original characters removed on either side of `prev`'s region.
    let before = p.saturating_sub(q);
    let after = next_end.saturating_sub(region_end);

    let mut text: String = prev_chars[..cut_start].iter().collect();
    text.push_str(next.inserted_text());
    text.extend(&prev_chars[cut_end..]);

    Some(EditOp::from_parts(q.min(p), before + d + after, text))
}
