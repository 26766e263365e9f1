//! Selection-set depth.
//!
//! A field adds one level; inline fragments and named spreads add none of
//! their own. Spreads of a fragment already on the current path, and spreads
//! of fragments the document never defines, contribute 0.

use std::collections::{HashMap, HashSet};

use async_graphql::parser::types::{ExecutableDocument, FragmentDefinition, Selection, SelectionSet};
use async_graphql::{Name, Positioned};

pub struct DepthWalker<'a> {
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    visiting: HashSet<&'a str>,
    memo: HashMap<&'a str, usize>,
    truncations: usize,
}

impl<'a> DepthWalker<'a> {
    pub fn new(document: &'a ExecutableDocument) -> Self {
        Self {
            fragments: &document.fragments,
            visiting: HashSet::new(),
            memo: HashMap::new(),
            truncations: 0,
        }
    }

    /// Maximum depth across the set's selections.
    pub fn selection_set(&mut self, set: &'a SelectionSet) -> usize {
        set.items
            .iter()
            .map(|selection| self.selection(&selection.node))
            .max()
            .unwrap_or(0)
    }

    fn selection(&mut self, selection: &'a Selection) -> usize {
        match selection {
            Selection::Field(field) => 1 + self.selection_set(&field.node.selection_set.node),
            Selection::InlineFragment(fragment) => {
                self.selection_set(&fragment.node.selection_set.node)
            }
            Selection::FragmentSpread(spread) => {
                self.fragment(spread.node.fragment_name.node.as_str())
            }
        }
    }

    /// Only fragments whose walk never ran into the visited set are memoised;
    /// a truncated result depends on the path it was computed on.
    fn fragment(&mut self, name: &'a str) -> usize {
        if self.visiting.contains(name) {
            self.truncations += 1;
            return 0;
        }
        if let Some(depth) = self.memo.get(name) {
            return *depth;
        }
        let Some(definition) = self.fragments.get(name) else {
            return 0;
        };

        let truncations = self.truncations;
        self.visiting.insert(name);
        let depth = self.selection_set(&definition.node.selection_set.node);
        self.visiting.remove(name);
        if self.truncations == truncations {
            self.memo.insert(name, depth);
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::parser::parse_query;
    use proptest::prelude::*;

    fn depth_of(query: &str) -> usize {
        let document = parse_query(query).expect("parse");
        let mut walker = DepthWalker::new(&document);
        document
            .operations
            .iter()
            .map(|(_, op)| walker.selection_set(&op.node.selection_set.node))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_plain_nesting() {
        assert_eq!(depth_of("{ a }"), 1);
        assert_eq!(depth_of("{ a { b { c } } d }"), 3);
    }

    #[test]
    fn test_inline_fragment_adds_no_level() {
        assert_eq!(depth_of("{ a { ... on T { b { c } } } }"), 3);
    }

    #[test]
    fn test_named_fragment_resolves() {
        assert_eq!(
            depth_of("{ a { ...F } } fragment F on T { b { c } }"),
            3
        );
    }

    #[test]
    fn test_fragment_cycle_terminates() {
        let depth = depth_of(
            "{ a { ...A } } \
             fragment A on T { b { ...B } } \
             fragment B on T { c { ...A } }",
        );
        assert_eq!(depth, 3);
    }

    #[test]
    fn test_cycle_cut_on_one_path_does_not_shorten_another() {
        let depth = depth_of(
            "{ a { ...A } w { v { ...B } } } \
             fragment A on T { b { ...B } } \
             fragment B on T { c { d { e { ...A } } } }",
        );
        // w > v > c > d > e > b, where A is no longer on the path.
        assert_eq!(depth, 6);
    }

    #[test]
    fn test_self_referencing_fragment() {
        assert_eq!(depth_of("{ ...F } fragment F on Query { x { ...F } }"), 1);
    }

    #[test]
    fn test_unknown_fragment_contributes_zero() {
        assert_eq!(depth_of("{ a { ...Missing } }"), 1);
        assert_eq!(depth_of("{ ...Missing }"), 0);
    }

    #[test]
    fn test_shared_fragment_counted_in_each_branch() {
        let depth = depth_of(
            "{ a { ...F } b { c { ...F } } } fragment F on T { x { y } }",
        );
        assert_eq!(depth, 4);
    }

    proptest! {
        #[test]
        fn prop_fragment_graphs_terminate(targets in proptest::collection::vec(0usize..8, 1..8)) {
            let n = targets.len();
            let mut query = String::from("{ root { ...F0 } }");
            for (i, target) in targets.iter().enumerate() {
                query.push_str(&format!(" fragment F{i} on T {{ f{i} {{ ...F{} }} }}", target % n));
            }

            let depth = depth_of(&query);
            prop_assert!(depth >= 2);
            prop_assert!(depth <= 1 + n);
        }
    }
}
