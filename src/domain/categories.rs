//! Category hierarchy assembly.

use std::collections::HashMap;

use serde::Serialize;

use crate::domain::entities::CategoryRecord;
use crate::domain::types::CategoryId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: CategoryRecord,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    pub fn count(nodes: &[CategoryNode]) -> usize {
        nodes
            .iter()
            .map(|node| 1 + CategoryNode::count(&node.children))
            .sum()
    }
}

/// Build a forest from a flat list of categories.
///
/// A category becomes a root when its parent is unset, zero, itself, or not
/// present in `categories`. Siblings are ordered by `sort_order` (missing
/// counts as zero) and keep input order on ties. Categories reachable only
/// through a parent cycle are emitted as extra roots after the regular ones,
/// so every distinct input id appears exactly once in the result.
pub fn build_category_tree(categories: Vec<CategoryRecord>) -> Vec<CategoryNode> {
    let mut order: Vec<CategoryId> = Vec::with_capacity(categories.len());
    let mut records: HashMap<CategoryId, CategoryRecord> = HashMap::with_capacity(categories.len());

    for category in categories {
        if records.contains_key(&category.id) {
            continue;
        }
        order.push(category.id);
        records.insert(category.id, category);
    }

    let mut roots: Vec<CategoryId> = Vec::new();
    let mut children: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();

    for id in &order {
        let Some(record) = records.get(id) else {
            continue;
        };
        match record.parent() {
            Some(parent) if parent != *id && records.contains_key(&parent) => {
                children.entry(parent).or_default().push(*id);
            }
            _ => roots.push(*id),
        }
    }

    sort_siblings(&mut roots, &records);
    for ids in children.values_mut() {
        sort_siblings(ids, &records);
    }

    let mut tree: Vec<CategoryNode> = roots
        .into_iter()
        .filter_map(|id| assemble(id, &mut records, &children))
        .collect();

    for id in &order {
        if records.contains_key(id)
            && let Some(node) = assemble(*id, &mut records, &children)
        {
            tree.push(node);
        }
    }

    tree
}

fn sort_siblings(ids: &mut [CategoryId], records: &HashMap<CategoryId, CategoryRecord>) {
    ids.sort_by_key(|id| records.get(id).map(CategoryRecord::sort_key).unwrap_or(0));
}

fn assemble(
    id: CategoryId,
    records: &mut HashMap<CategoryId, CategoryRecord>,
    children: &HashMap<CategoryId, Vec<CategoryId>>,
) -> Option<CategoryNode> {
    let category = records.remove(&id)?;
    let nested = children
        .get(&id)
        .map(|ids| {
            ids.iter()
                .filter_map(|child| assemble(*child, records, children))
                .collect()
        })
        .unwrap_or_default();

    Some(CategoryNode {
        category,
        children: nested,
    })
}
