use std::collections::{BTreeMap, HashMap};

use sgs_types::ContentHash;
use tracing::debug;

use crate::error::{ClosureError, ClosureResult};

/// Descendants of one object mapped to their shortest reference path length.
///
/// Direct children have depth 1. An object never appears in its own closure.
pub type Closure = BTreeMap<ContentHash, u32>;

/// Derives closures for objects whose children are already known.
///
/// A child is known once its closure has been registered, either because it
/// is persisted ([`register`](Self::register)) or because it was built
/// earlier by this builder ([`build`](Self::build)). Building an object whose
/// child is unknown fails instead of producing a partial closure.
#[derive(Debug, Default)]
pub struct ClosureBuilder {
    known: HashMap<ContentHash, Closure>,
}

impl ClosureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the closure of an object that already exists. A persisted
    /// leaf is registered with an empty closure.
    pub fn register(&mut self, id: ContentHash, closure: Closure) {
        self.known.insert(id, closure);
    }

    pub fn is_known(&self, id: &ContentHash) -> bool {
        self.known.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Derive the closure of `object` from its direct `children`.
    ///
    /// Duplicate children collapse. Each child contributes itself at depth 1
    /// and its own descendants one level deeper, keeping the minimum over
    /// every path. On success the result is registered, so later objects may
    /// reference `object`.
    pub fn build(
        &mut self,
        object: ContentHash,
        children: &[ContentHash],
    ) -> ClosureResult<Closure> {
        let mut closure = Closure::new();

        for child in children {
            if *child == object {
                return Err(ClosureError::SelfReference(object));
            }
            let grandchildren =
                self.known
                    .get(child)
                    .ok_or(ClosureError::DanglingReference {
                        object,
                        child: *child,
                    })?;

            closure.insert(*child, 1);
            for (descendant, depth) in grandchildren {
                if *descendant == object {
                    return Err(ClosureError::CycleDetected(object));
                }
                let candidate = depth.saturating_add(1);
                closure
                    .entry(*descendant)
                    .and_modify(|d| *d = (*d).min(candidate))
                    .or_insert(candidate);
            }
        }

        debug!(
            object = %object.short_hex(),
            children = children.len(),
            entries = closure.len(),
            "closure derived"
        );

        self.known.insert(object, closure.clone());
        Ok(closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(tag: &str) -> ContentHash {
        ContentHash::from_bytes(tag.as_bytes())
    }

    #[test]
    fn leaf_has_empty_closure() {
        let mut b = ClosureBuilder::new();
        let closure = b.build(id("leaf"), &[]).unwrap();
        assert!(closure.is_empty());
        assert!(b.is_known(&id("leaf")));
    }

    #[test]
    fn direct_children_have_depth_one() {
        let mut b = ClosureBuilder::new();
        b.build(id("b"), &[]).unwrap();
        b.build(id("c"), &[]).unwrap();
        let closure = b.build(id("a"), &[id("b"), id("c")]).unwrap();
        assert_eq!(closure.len(), 2);
        assert_eq!(closure[&id("b")], 1);
        assert_eq!(closure[&id("c")], 1);
    }

    #[test]
    fn shortest_path_wins() {
        // A -> B, B -> C, A -> C
        let mut b = ClosureBuilder::new();
        b.build(id("c"), &[]).unwrap();
        b.build(id("b"), &[id("c")]).unwrap();
        let closure = b.build(id("a"), &[id("b"), id("c")]).unwrap();
        assert_eq!(closure[&id("b")], 1);
        assert_eq!(closure[&id("c")], 1);
    }

    #[test]
    fn deep_chain_increments_depth() {
        let mut b = ClosureBuilder::new();
        b.build(id("d"), &[]).unwrap();
        b.build(id("c"), &[id("d")]).unwrap();
        b.build(id("b"), &[id("c")]).unwrap();
        let closure = b.build(id("a"), &[id("b")]).unwrap();
        assert_eq!(closure[&id("b")], 1);
        assert_eq!(closure[&id("c")], 2);
        assert_eq!(closure[&id("d")], 3);
    }

    #[test]
    fn registered_closures_are_extended() {
        let mut b = ClosureBuilder::new();
        let mut stored = Closure::new();
        stored.insert(id("x"), 1);
        stored.insert(id("y"), 4);
        b.register(id("p"), stored);

        let closure = b.build(id("root"), &[id("p")]).unwrap();
        assert_eq!(closure[&id("p")], 1);
        assert_eq!(closure[&id("x")], 2);
        assert_eq!(closure[&id("y")], 5);
    }

    #[test]
    fn duplicate_children_collapse() {
        let mut b = ClosureBuilder::new();
        b.build(id("b"), &[]).unwrap();
        let closure = b.build(id("a"), &[id("b"), id("b")]).unwrap();
        assert_eq!(closure.len(), 1);
    }

    #[test]
    fn unknown_child_is_dangling() {
        let mut b = ClosureBuilder::new();
        let err = b.build(id("a"), &[id("ghost")]).unwrap_err();
        assert_eq!(
            err,
            ClosureError::DanglingReference {
                object: id("a"),
                child: id("ghost"),
            }
        );
        assert!(!b.is_known(&id("a")));
    }

    #[test]
    fn self_reference_is_rejected() {
        let mut b = ClosureBuilder::new();
        let err = b.build(id("a"), &[id("a")]).unwrap_err();
        assert_eq!(err, ClosureError::SelfReference(id("a")));
    }

    #[test]
    fn reaching_self_through_child_is_a_cycle() {
        let mut b = ClosureBuilder::new();
        let mut stored = Closure::new();
        stored.insert(id("a"), 1);
        b.register(id("b"), stored);
        let err = b.build(id("a"), &[id("b")]).unwrap_err();
        assert_eq!(err, ClosureError::CycleDetected(id("a")));
    }
}
