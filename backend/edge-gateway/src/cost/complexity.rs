//! Weighted complexity score.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use async_graphql::parser::types::{
    ExecutableDocument, Field, FragmentDefinition, Selection, SelectionSet,
};
use async_graphql::{Name, Positioned, Value, Variables};

use super::weights::{FieldWeight, WeightTable, CONNECTION_META_FIELDS};

const PAGE_SIZE_ARGUMENTS: &[&str] = &["first", "last", "limit"];

pub struct ComplexityWalker<'a> {
    table: &'a WeightTable,
    variables: &'a Variables,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    visiting: HashSet<&'a str>,
    memo: HashMap<&'a str, u64>,
    truncations: usize,
}

impl<'a> ComplexityWalker<'a> {
    pub fn new(table: &'a WeightTable, document: &'a ExecutableDocument, variables: &'a Variables) -> Self {
        Self {
            table,
            variables,
            fragments: &document.fragments,
            visiting: HashSet::new(),
            memo: HashMap::new(),
            truncations: 0,
        }
    }

    pub fn selection_set(&mut self, set: &'a SelectionSet) -> u64 {
        set.items.iter().fold(0u64, |acc, selection| {
            acc.saturating_add(self.selection(&selection.node))
        })
    }

    fn selection(&mut self, selection: &'a Selection) -> u64 {
        match selection {
            Selection::Field(field) => self.field(&field.node),
            Selection::InlineFragment(fragment) => {
                self.selection_set(&fragment.node.selection_set.node)
            }
            Selection::FragmentSpread(spread) => {
                self.fragment(spread.node.fragment_name.node.as_str())
            }
        }
    }

    fn field(&mut self, field: &'a Field) -> u64 {
        let children = &field.selection_set.node;
        match self.table.weight_for(field.name.node.as_str()) {
            FieldWeight::Flat { cost } => cost.saturating_add(self.selection_set(children)),
            FieldWeight::Paginated { base } => {
                let mut meta = 0u64;
                let mut per_item = 0u64;
                for child in &children.items {
                    let cost = self.selection(&child.node);
                    match &child.node {
                        Selection::Field(f)
                            if CONNECTION_META_FIELDS.contains(&f.node.name.node.as_str()) =>
                        {
                            meta = meta.saturating_add(cost)
                        }
                        _ => per_item = per_item.saturating_add(cost),
                    }
                }
                let page_size = self.table.page_size(self.requested_page_size(field));
                base.saturating_add(meta)
                    .saturating_add(page_size.saturating_mul(per_item.max(1)))
            }
        }
    }

    /// Only fragments whose walk never ran into the visited set are memoised;
    /// a truncated result depends on the path it was computed on.
    fn fragment(&mut self, name: &'a str) -> u64 {
        if self.visiting.contains(name) {
            self.truncations += 1;
            return 0;
        }
        if let Some(cost) = self.memo.get(name) {
            return *cost;
        }
        let Some(definition) = self.fragments.get(name) else {
            return 0;
        };

        let truncations = self.truncations;
        self.visiting.insert(name);
        let cost = self.selection_set(&definition.node.selection_set.node);
        self.visiting.remove(name);
        if self.truncations == truncations {
            self.memo.insert(name, cost);
        }
        cost
    }

    /// `first`/`last`/`limit`, or `page: { first | last }`, with variables substituted.
    fn requested_page_size(&self, field: &Field) -> Option<i64> {
        let mut from_page = None;
        for (name, value) in &field.arguments {
            let value = value
                .node
                .clone()
                .into_const_with(|var| {
                    Ok::<_, Infallible>(self.variables.get(&var).cloned().unwrap_or_default())
                })
                .unwrap_or_else(|never| match never {});
            match name.node.as_str() {
                arg if PAGE_SIZE_ARGUMENTS.contains(&arg) => {
                    if let Some(n) = positive_int(&value) {
                        return Some(n);
                    }
                }
                "page" => {
                    if let Value::Object(page) = &value {
                        from_page = from_page.or_else(|| {
                            ["first", "last"]
                                .iter()
                                .find_map(|key| page.get(*key).and_then(positive_int))
                        });
                    }
                }
                _ => {}
            }
        }
        from_page
    }
}

fn positive_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().filter(|n| *n > 0),
        _ => None,
    }
}
