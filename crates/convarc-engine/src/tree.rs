use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Error, Result};
use convarc_store::{
    DialogueTreeRecord, LinearSequenceRecord, MessagePathRecord, MessageRecord,
    SequenceMessageRecord, Store,
};
use convarc_types::{BranchReason, Role};

/// In-memory representation of one message in the tree
struct TreeNode {
    parent_id: Option<Uuid>,
    role: Role,
    created_at: Option<DateTime<Utc>>,
    children: Vec<Uuid>,
}

impl TreeNode {
    /// Sort key; missing timestamps collapse to 0.0
    fn timestamp(&self) -> f64 {
        self.created_at
            .map(|ts| ts.timestamp() as f64 + ts.timestamp_subsec_micros() as f64 / 1e6)
            .unwrap_or(0.0)
    }
}

struct TreeAnalysis {
    dialogue_id: Uuid,
    nodes: HashMap<Uuid, TreeNode>,
    /// Node ids in stable (timestamp, source) order
    order: Vec<Uuid>,
    roots: Vec<Uuid>,
    leaves: Vec<Uuid>,
    depths: HashMap<Uuid, i64>,
    branch_count: i64,
    primary_leaf: Option<Uuid>,
    primary_path_ids: HashSet<Uuid>,
    has_regenerations: bool,
    has_edits: bool,
}

/// Per-dialogue result of one tree build
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogueTreeCounts {
    pub paths: usize,
    pub sequences: usize,
    pub sequence_messages: usize,
    pub is_linear: bool,
}

/// Batch totals for one tree-building run
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeCounts {
    pub dialogues: usize,
    pub linear: usize,
    pub branched: usize,
    pub paths: usize,
    pub sequences: usize,
    pub sequence_messages: usize,
    pub failed: usize,
}

/// Analyzes dialogue trees and materializes the derived structures:
/// one DialogueTree row, one MessagePath per message, one LinearSequence
/// per leaf with its SequenceMessages.
///
/// Works uniformly across sources. Linear dialogues produce degenerate
/// trees (branch_count = 0); branched dialogues get full analysis.
pub struct TreeBuilder<'a> {
    store: &'a Store,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn build_all(&self) -> TreeCounts {
        info!("tree building started");
        let mut counts = TreeCounts::default();

        let dialogues = match self.store.list_dialogues() {
            Ok(dialogues) => dialogues,
            Err(err) => {
                warn!(error = %err, "could not list dialogues");
                counts.failed += 1;
                return counts;
            }
        };

        for dialogue in dialogues {
            if self.store.begin().is_err() {
                counts.failed += 1;
                continue;
            }
            match self.build_for_dialogue(dialogue.id) {
                Ok(result) => {
                    if self.store.commit().is_err() {
                        let _ = self.store.rollback();
                        counts.failed += 1;
                        continue;
                    }
                    counts.dialogues += 1;
                    counts.paths += result.paths;
                    counts.sequences += result.sequences;
                    counts.sequence_messages += result.sequence_messages;
                    if result.is_linear {
                        counts.linear += 1;
                    } else {
                        counts.branched += 1;
                    }
                }
                Err(err) => {
                    warn!(dialogue = %dialogue.id, error = %err, "tree build failed");
                    let _ = self.store.rollback();
                    counts.failed += 1;
                }
            }
        }

        info!(
            dialogues = counts.dialogues,
            linear = counts.linear,
            branched = counts.branched,
            paths = counts.paths,
            sequences = counts.sequences,
            failed = counts.failed,
            "tree building finished"
        );
        counts
    }

    /// Rebuild the tree-derived rows for one dialogue. Clearing runs
    /// children-first and is scoped to this dialogue only.
    pub fn build_for_dialogue(&self, dialogue_id: Uuid) -> Result<DialogueTreeCounts> {
        self.store.clear_tree_for_dialogue(dialogue_id)?;

        let messages = self.store.messages_for_dialogue(dialogue_id, false)?;
        if messages.is_empty() {
            return Ok(DialogueTreeCounts {
                is_linear: true,
                ..Default::default()
            });
        }

        let analysis = analyze(dialogue_id, &messages)?;

        self.persist_dialogue_tree(&analysis)?;
        let paths = self.persist_message_paths(&analysis)?;
        let (sequences, sequence_messages) = self.persist_linear_sequences(&analysis)?;

        Ok(DialogueTreeCounts {
            paths,
            sequences,
            sequence_messages,
            is_linear: analysis.branch_count == 0,
        })
    }

    fn persist_dialogue_tree(&self, analysis: &TreeAnalysis) -> Result<()> {
        let max_depth = analysis.depths.values().copied().max().unwrap_or(0);
        self.store.insert_dialogue_tree(&DialogueTreeRecord {
            dialogue_id: analysis.dialogue_id,
            total_nodes: analysis.nodes.len() as i64,
            max_depth,
            branch_count: analysis.branch_count,
            leaf_count: analysis.leaves.len() as i64,
            primary_leaf_id: analysis.primary_leaf,
            primary_path_length: analysis.primary_path_ids.len() as i64,
            has_regenerations: analysis.has_regenerations,
            has_edits: analysis.has_edits,
        })?;
        Ok(())
    }

    fn persist_message_paths(&self, analysis: &TreeAnalysis) -> Result<usize> {
        let sibling_indices = compute_sibling_indices(analysis);

        let mut count = 0;
        for id in &analysis.order {
            let node = &analysis.nodes[id];
            let ancestors = ancestor_ids(&analysis.nodes, *id)?;
            self.store.insert_message_path(&MessagePathRecord {
                message_id: *id,
                dialogue_id: analysis.dialogue_id,
                depth: ancestors.len() as i64,
                ancestor_path: ancestors,
                is_root: is_effective_root(&analysis.nodes, node),
                is_leaf: node.children.is_empty(),
                child_count: node.children.len() as i64,
                sibling_index: sibling_indices.get(id).copied().unwrap_or(0),
                is_on_primary_path: analysis.primary_path_ids.contains(id),
            })?;
            count += 1;
        }
        Ok(count)
    }

    fn persist_linear_sequences(&self, analysis: &TreeAnalysis) -> Result<(usize, usize)> {
        let mut sequence_count = 0;
        let mut message_count = 0;

        for leaf in &analysis.leaves {
            let mut path_ids = ancestor_ids(&analysis.nodes, *leaf)?;
            path_ids.push(*leaf);

            let is_primary = analysis.primary_leaf == Some(*leaf);
            let mut branch_reason = None;
            let mut branched_at_id = None;
            let mut branched_at_depth = None;

            if !is_primary && !analysis.primary_path_ids.is_empty() {
                // The branch point is the deepest ancestor still on the
                // primary path: the node just before the first divergence
                for (depth, message_id) in path_ids.iter().enumerate() {
                    if !analysis.primary_path_ids.contains(message_id) {
                        if depth > 0 {
                            let branch_id = path_ids[depth - 1];
                            branched_at_id = Some(branch_id);
                            branched_at_depth = Some((depth - 1) as i64);
                            branch_reason = analysis
                                .nodes
                                .get(&branch_id)
                                .and_then(|node| classify_branch(&analysis.nodes, node));
                        }
                        break;
                    }
                }
            }

            let sequence = LinearSequenceRecord {
                id: Uuid::new_v4(),
                dialogue_id: analysis.dialogue_id,
                leaf_message_id: *leaf,
                sequence_length: path_ids.len() as i64,
                is_primary,
                branch_reason,
                branched_at_message_id: branched_at_id,
                branched_at_depth,
            };
            self.store.insert_linear_sequence(&sequence)?;

            for (position, message_id) in path_ids.iter().enumerate() {
                self.store.insert_sequence_message(&SequenceMessageRecord {
                    sequence_id: sequence.id,
                    message_id: *message_id,
                    position: position as i64,
                })?;
                message_count += 1;
            }
            sequence_count += 1;
        }

        Ok((sequence_count, message_count))
    }
}

fn analyze(dialogue_id: Uuid, messages: &[MessageRecord]) -> Result<TreeAnalysis> {
    let mut nodes: HashMap<Uuid, TreeNode> = HashMap::new();
    let mut order: Vec<Uuid> = Vec::with_capacity(messages.len());

    for message in messages {
        nodes.insert(
            message.id,
            TreeNode {
                parent_id: message.parent_id,
                role: message.role.clone(),
                created_at: message.created_at,
                children: Vec::new(),
            },
        );
        order.push(message.id);
    }

    // Link children in stable source order, then sort by timestamp
    // (missing timestamps sort first, ties keep source order)
    let mut children_by_parent: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for id in &order {
        let node = &nodes[id];
        if let Some(parent_id) = node.parent_id {
            if nodes.contains_key(&parent_id) {
                children_by_parent.entry(parent_id).or_default().push(*id);
            }
        }
    }
    for (parent_id, mut children) in children_by_parent {
        children.sort_by(|a, b| {
            nodes[a]
                .timestamp()
                .partial_cmp(&nodes[b].timestamp())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(parent) = nodes.get_mut(&parent_id) {
            parent.children = children;
        }
    }

    // Roots: no parent, or a parent outside the live set (orphans are
    // handled as additional roots in the same pass). Earliest is canonical.
    let mut roots: Vec<Uuid> = order
        .iter()
        .copied()
        .filter(|id| is_effective_root(&nodes, &nodes[id]))
        .collect();
    roots.sort_by(|a, b| {
        nodes[a]
            .timestamp()
            .partial_cmp(&nodes[b].timestamp())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Depth is the ancestor count; the walk doubles as cycle detection
    let mut depths = HashMap::new();
    for id in &order {
        depths.insert(*id, ancestor_ids(&nodes, *id)?.len() as i64);
    }

    let leaves: Vec<Uuid> = order
        .iter()
        .copied()
        .filter(|id| nodes[id].children.is_empty())
        .collect();
    let branch_count = order
        .iter()
        .filter(|id| nodes[*id].children.len() > 1)
        .count() as i64;

    // Primary leaf: longest chain wins, most recent timestamp breaks ties
    let primary_leaf = leaves
        .iter()
        .copied()
        .max_by(|a, b| {
            let score_a = (depths[a] + 1, nodes[a].timestamp());
            let score_b = (depths[b] + 1, nodes[b].timestamp());
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    let primary_path_ids: HashSet<Uuid> = match primary_leaf {
        Some(leaf) => {
            let mut ids: HashSet<Uuid> = ancestor_ids(&nodes, leaf)?.into_iter().collect();
            ids.insert(leaf);
            ids
        }
        None => HashSet::new(),
    };

    let mut has_regenerations = false;
    let mut has_edits = false;
    for id in &order {
        let node = &nodes[id];
        if node.children.len() <= 1 {
            continue;
        }
        match classify_branch(&nodes, node) {
            Some(BranchReason::Regeneration) => has_regenerations = true,
            Some(BranchReason::Edit) => has_edits = true,
            None => {}
        }
    }

    Ok(TreeAnalysis {
        dialogue_id,
        nodes,
        order,
        roots,
        leaves,
        depths,
        branch_count,
        primary_leaf,
        primary_path_ids,
        has_regenerations,
        has_edits,
    })
}

fn is_effective_root(nodes: &HashMap<Uuid, TreeNode>, node: &TreeNode) -> bool {
    match node.parent_id {
        None => true,
        Some(parent_id) => !nodes.contains_key(&parent_id),
    }
}

/// Ancestor ids from root to parent (excluding the node itself). A repeated
/// node during the walk means the parent chain closes on itself.
fn ancestor_ids(nodes: &HashMap<Uuid, TreeNode>, id: Uuid) -> Result<Vec<Uuid>> {
    let mut ancestors = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(id);

    let mut current = &nodes[&id];
    while let Some(parent_id) = current.parent_id {
        let Some(parent) = nodes.get(&parent_id) else {
            break;
        };
        if !visited.insert(parent_id) {
            return Err(Error::Structure(format!(
                "parent cycle through message {}",
                id
            )));
        }
        ancestors.push(parent_id);
        current = parent;
    }

    ancestors.reverse();
    Ok(ancestors)
}

/// Same-role children mean a regenerated response; mixed roles mean the
/// user edited a prompt
fn classify_branch(nodes: &HashMap<Uuid, TreeNode>, node: &TreeNode) -> Option<BranchReason> {
    if node.children.len() <= 1 {
        return None;
    }
    let roles: HashSet<&str> = node
        .children
        .iter()
        .map(|child| nodes[child].role.as_str())
        .collect();
    if roles.len() == 1 {
        Some(BranchReason::Regeneration)
    } else {
        Some(BranchReason::Edit)
    }
}

fn compute_sibling_indices(analysis: &TreeAnalysis) -> HashMap<Uuid, i64> {
    let mut indices = HashMap::new();
    for id in &analysis.order {
        for (index, child) in analysis.nodes[id].children.iter().enumerate() {
            indices.insert(*child, index as i64);
        }
    }
    for root in &analysis.roots {
        indices.insert(*root, 0);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn message(
        dialogue_id: Uuid,
        source_id: &str,
        parent_id: Option<Uuid>,
        role: Role,
        epoch: i64,
    ) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            dialogue_id,
            source_id: source_id.to_string(),
            parent_id,
            role,
            author_id: None,
            author_name: None,
            created_at: Some(Utc.timestamp_opt(epoch, 0).unwrap()),
            updated_at: None,
            content_hash: None,
            deleted_at: None,
            source_json: json!({}),
        }
    }

    #[test]
    fn test_linear_chain_analysis() {
        let dialogue_id = Uuid::new_v4();
        let root = message(dialogue_id, "a", None, Role::User, 1000);
        let reply = message(dialogue_id, "b", Some(root.id), Role::Assistant, 2000);
        let analysis = analyze(dialogue_id, &[root.clone(), reply.clone()]).unwrap();

        assert_eq!(analysis.branch_count, 0);
        assert_eq!(analysis.leaves, vec![reply.id]);
        assert_eq!(analysis.primary_leaf, Some(reply.id));
        assert_eq!(analysis.depths[&reply.id], 1);
        assert!(!analysis.has_regenerations);
        assert!(!analysis.has_edits);
    }

    #[test]
    fn test_regeneration_branch_primary_is_most_recent() {
        let dialogue_id = Uuid::new_v4();
        let root = message(dialogue_id, "q", None, Role::User, 1);
        let a1 = message(dialogue_id, "a1", Some(root.id), Role::Assistant, 2);
        let a2 = message(dialogue_id, "a2", Some(root.id), Role::Assistant, 3);
        let analysis = analyze(dialogue_id, &[root.clone(), a1.clone(), a2.clone()]).unwrap();

        assert_eq!(analysis.branch_count, 1);
        assert_eq!(analysis.leaves.len(), 2);
        // Equal path lengths: the later timestamp wins
        assert_eq!(analysis.primary_leaf, Some(a2.id));
        assert!(analysis.has_regenerations);
        assert!(!analysis.has_edits);
    }

    #[test]
    fn test_edit_branch_mixed_roles() {
        let dialogue_id = Uuid::new_v4();
        let root = message(dialogue_id, "q", None, Role::User, 1);
        let edit = message(dialogue_id, "e", Some(root.id), Role::User, 2);
        let answer = message(dialogue_id, "a", Some(root.id), Role::Assistant, 3);
        let analysis = analyze(dialogue_id, &[root, edit, answer]).unwrap();

        assert!(analysis.has_edits);
        assert!(!analysis.has_regenerations);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let dialogue_id = Uuid::new_v4();
        let mut a = message(dialogue_id, "a", None, Role::User, 1);
        let b = message(dialogue_id, "b", Some(a.id), Role::Assistant, 2);
        a.parent_id = Some(b.id);

        assert!(analyze(dialogue_id, &[a, b]).is_err());
    }

    #[test]
    fn test_orphan_parent_becomes_additional_root() {
        let dialogue_id = Uuid::new_v4();
        let root = message(dialogue_id, "a", None, Role::User, 1);
        let orphan = message(dialogue_id, "b", Some(Uuid::new_v4()), Role::User, 5);
        let analysis = analyze(dialogue_id, &[root.clone(), orphan.clone()]).unwrap();

        assert_eq!(analysis.roots.len(), 2);
        // Earliest root is canonical
        assert_eq!(analysis.roots[0], root.id);
        assert_eq!(analysis.depths[&orphan.id], 0);
    }
}
