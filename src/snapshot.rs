//! Versioned accessibility snapshots with stable node uids.
//!
//! Each capture gets a monotonically increasing generation id and every node
//! a `{generation}_{sequence}` uid assigned in pre-order, so a uid can be
//! handed to a caller and later resolved back to the node, but only while the
//! snapshot it came from is still the current one.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::driver::BackendNodeId;

/// State of an attribute that can be true, false, or mixed (e.g. a tri-state
/// checkbox).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixedState {
    True,
    False,
    Mixed,
}

impl MixedState {
    pub fn is_truthy(self) -> bool {
        !matches!(self, MixedState::False)
    }
}

impl fmt::Display for MixedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixedState::True => write!(f, "true"),
            MixedState::False => write!(f, "false"),
            MixedState::Mixed => write!(f, "mixed"),
        }
    }
}

/// The open-ended set of optional accessibility attributes a node may carry.
///
/// `Option` distinguishes "attribute absent" from "attribute present but
/// false", which drives the conditional rendering below: toggle attributes
/// render a capability flag whenever present and the bare name only when
/// true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxNodeAttributes {
    pub value: Option<String>,
    pub value_text: Option<String>,
    pub value_min: Option<String>,
    pub value_max: Option<String>,
    pub level: Option<String>,
    pub autocomplete: Option<String>,
    pub has_popup: Option<String>,
    pub invalid: Option<String>,
    pub orientation: Option<String>,
    pub description: Option<String>,
    pub key_shortcuts: Option<String>,
    pub role_description: Option<String>,
    pub disabled: Option<bool>,
    pub expanded: Option<bool>,
    pub focused: Option<bool>,
    pub selected: Option<bool>,
    pub modal: bool,
    pub multiline: bool,
    pub readonly: bool,
    pub required: bool,
    pub multiselectable: bool,
    pub pressed: Option<MixedState>,
    pub checked: Option<MixedState>,
}

/// One node of the accessibility tree as delivered by the driver, before uid
/// assignment.
#[derive(Debug, Clone, Default)]
pub struct AxTreeNode {
    pub role: String,
    pub name: String,
    pub attributes: AxNodeAttributes,
    pub backend_node_id: Option<BackendNodeId>,
    pub children: Vec<AxTreeNode>,
}

/// An immutable snapshot node carrying its assigned uid.
#[derive(Debug)]
pub struct SnapshotNode {
    pub uid: String,
    pub role: String,
    pub name: String,
    pub attributes: AxNodeAttributes,
    pub backend_node_id: Option<BackendNodeId>,
    pub children: Vec<Arc<SnapshotNode>>,
}

/// An accessibility tree captured at one point in time, plus its
/// generation-scoped uid lookup table.
#[derive(Debug)]
pub struct TextSnapshot {
    generation: u64,
    root: Arc<SnapshotNode>,
    index: HashMap<String, Arc<SnapshotNode>>,
}

impl TextSnapshot {
    /// Assigns uids in pre-order starting at 0 and builds the lookup table.
    pub fn build(generation: u64, root: AxTreeNode) -> Self {
        let mut index = HashMap::new();
        let mut counter = 0u64;
        let root = assign_uids(root, generation, &mut counter, &mut index);
        Self {
            generation,
            root,
            index,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> &Arc<SnapshotNode> {
        &self.root
    }

    /// Looks up a node by uid. The uid must come from this snapshot.
    pub fn node(&self, uid: &str) -> Option<&Arc<SnapshotNode>> {
        self.index.get(uid)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn assign_uids(
    node: AxTreeNode,
    generation: u64,
    counter: &mut u64,
    index: &mut HashMap<String, Arc<SnapshotNode>>,
) -> Arc<SnapshotNode> {
    let uid = format!("{generation}_{}", *counter);
    *counter += 1;
    let children = node
        .children
        .into_iter()
        .map(|child| assign_uids(child, generation, counter, index))
        .collect();
    let snapshot_node = Arc::new(SnapshotNode {
        uid: uid.clone(),
        role: node.role,
        name: node.name,
        attributes: node.attributes,
        backend_node_id: node.backend_node_id,
        children,
    });
    index.insert(uid, Arc::clone(&snapshot_node));
    snapshot_node
}

/// Renders a snapshot as an indented pre-order text dump, one node per line.
pub fn format_snapshot(root: &SnapshotNode) -> String {
    let mut out = String::new();
    format_node(root, 0, &mut out);
    out
}

fn format_node(node: &SnapshotNode, depth: usize, out: &mut String) {
    let mut parts = vec![
        format!("uid={}", node.uid),
        node.role.clone(),
        format!("\"{}\"", node.name),
    ];
    append_attributes(&node.attributes, &mut parts);
    let _ = writeln!(out, "{}{}", "  ".repeat(depth), parts.join(" "));
    for child in &node.children {
        format_node(child, depth + 1, out);
    }
}

/// Fixed ordered attribute tables; rendering is driven by the table entry
/// kind, not by inspecting the node ad hoc.
fn append_attributes(attributes: &AxNodeAttributes, parts: &mut Vec<String>) {
    let value_properties = [
        ("value", attributes.value.as_deref()),
        ("valuetext", attributes.value_text.as_deref()),
        ("valuemin", attributes.value_min.as_deref()),
        ("valuemax", attributes.value_max.as_deref()),
        ("level", attributes.level.as_deref()),
        ("autocomplete", attributes.autocomplete.as_deref()),
        ("haspopup", attributes.has_popup.as_deref()),
        ("invalid", attributes.invalid.as_deref()),
        ("orientation", attributes.orientation.as_deref()),
        ("description", attributes.description.as_deref()),
        ("keyshortcuts", attributes.key_shortcuts.as_deref()),
        ("roledescription", attributes.role_description.as_deref()),
    ];
    for (name, value) in value_properties {
        if let Some(value) = value {
            parts.push(format!("{name}=\"{value}\""));
        }
    }

    // Booleans that also advertise a capability when present at all.
    let toggle_properties = [
        ("disabled", "disableable", attributes.disabled),
        ("expanded", "expandable", attributes.expanded),
        ("focused", "focusable", attributes.focused),
        ("selected", "selectable", attributes.selected),
    ];
    for (name, capability, state) in toggle_properties {
        if let Some(state) = state {
            parts.push(capability.to_string());
            if state {
                parts.push(name.to_string());
            }
        }
    }

    let flag_properties = [
        ("modal", attributes.modal),
        ("multiline", attributes.multiline),
        ("readonly", attributes.readonly),
        ("required", attributes.required),
        ("multiselectable", attributes.multiselectable),
    ];
    for (name, set) in flag_properties {
        if set {
            parts.push(name.to_string());
        }
    }

    // Mixed attributes render the bare name whenever present and the value
    // only when truthy.
    let mixed_properties = [
        ("pressed", attributes.pressed),
        ("checked", attributes.checked),
    ];
    for (name, state) in mixed_properties {
        if let Some(state) = state {
            parts.push(name.to_string());
            if state.is_truthy() {
                parts.push(format!("{name}=\"{state}\""));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: &str, name: &str, children: Vec<AxTreeNode>) -> AxTreeNode {
        AxTreeNode {
            role: role.into(),
            name: name.into(),
            children,
            ..Default::default()
        }
    }

    #[test]
    fn uids_follow_preorder() {
        let tree = node(
            "RootWebArea",
            "Page",
            vec![
                node("button", "First", vec![node("StaticText", "Label", vec![])]),
                node("link", "Second", vec![]),
            ],
        );
        let snapshot = TextSnapshot::build(3, tree);
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.root().uid, "3_0");
        assert_eq!(snapshot.root().children[0].uid, "3_1");
        assert_eq!(snapshot.root().children[0].children[0].uid, "3_2");
        assert_eq!(snapshot.root().children[1].uid, "3_3");
        assert!(snapshot.node("3_2").is_some());
        assert!(snapshot.node("2_0").is_none());
    }

    #[test]
    fn renders_indented_tree() {
        let tree = node(
            "RootWebArea",
            "Page",
            vec![node("button", "Go", vec![])],
        );
        let snapshot = TextSnapshot::build(1, tree);
        assert_eq!(
            format_snapshot(snapshot.root()),
            "uid=1_0 RootWebArea \"Page\"\n  uid=1_1 button \"Go\"\n"
        );
    }

    #[test]
    fn renders_value_and_toggle_attributes() {
        let mut tree = node("checkbox", "Accept", vec![]);
        tree.attributes.disabled = Some(true);
        tree.attributes.focused = Some(false);
        tree.attributes.required = true;
        tree.attributes.checked = Some(MixedState::Mixed);
        tree.attributes.level = Some("2".into());
        let snapshot = TextSnapshot::build(1, tree);
        assert_eq!(
            format_snapshot(snapshot.root()),
            "uid=1_0 checkbox \"Accept\" level=\"2\" disableable disabled focusable required checked checked=\"mixed\"\n"
        );
    }

    #[test]
    fn false_mixed_state_renders_bare_name_only() {
        let mut tree = node("button", "Toggle", vec![]);
        tree.attributes.pressed = Some(MixedState::False);
        let snapshot = TextSnapshot::build(1, tree);
        assert_eq!(
            format_snapshot(snapshot.root()),
            "uid=1_0 button \"Toggle\" pressed\n"
        );
    }
}
