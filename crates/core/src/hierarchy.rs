//! The hierarchy walk: does a type transitively derive from a named base?
//!
//! Depth-first over direct-base edges in declaration order. Metadata is
//! externally supplied and may be cyclic or self-referential, so the walk
//! carries an explicit visited set (a revisited name is a dead end, even when
//! it equals the target) and a hard depth cap as a second bound.

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{Module, TypeRecord};
use crate::resolver::{Resolution, RunContext};

/// Upper bound on base-chain depth; genuine hierarchies are nowhere near it.
const MAX_CHAIN_DEPTH: u32 = 1000;

/// True if `ty` (defined in `module`) derives, directly or transitively,
/// from a type whose fully-qualified name is exactly `target`.
///
/// A type never derives from itself: the walk starts at `ty`'s bases and
/// `ty`'s own name is pre-seeded into the visited set, so even a malformed
/// self-referential base edge cannot produce a self-match. Unresolvable
/// ancestors are dead ends, never matches, regardless of their recorded name.
pub fn derives_from(
    module: &Arc<Module>,
    ty: &TypeRecord,
    target: &str,
    ctx: &mut RunContext,
) -> bool {
    if target.is_empty() {
        return false;
    }
    let mut visited = HashSet::new();
    visited.insert(ty.full_name.clone());
    walk(module, ty, target, ctx, &mut visited, 0)
}

fn walk(
    module: &Arc<Module>,
    ty: &TypeRecord,
    target: &str,
    ctx: &mut RunContext,
    visited: &mut HashSet<String>,
    depth: u32,
) -> bool {
    if depth >= MAX_CHAIN_DEPTH {
        return false;
    }
    for base in &ty.bases {
        // Visited check first: a cyclic edge back into the chain is a dead
        // end even when its name equals the target.
        if visited.contains(&base.full_name) {
            continue;
        }
        // Resolve before matching: an edge into a module we cannot locate is
        // a dead end even when its recorded name equals the target. Only
        // resolved names enter the visited set; an unresolved branch never
        // recurses, so it needs no cycle guard and must not mask the same
        // name reached later through a resolvable sibling.
        if let Resolution::Resolved(hit) = ctx.resolve(module, base) {
            if base.full_name == target {
                return true;
            }
            visited.insert(base.full_name.clone());
            let hit_module = hit.module().clone();
            if walk(&hit_module, hit.record(), target, ctx, visited, depth + 1) {
                return true;
            }
        }
    }
    false
}
