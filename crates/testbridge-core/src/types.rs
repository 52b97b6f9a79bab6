//! Test-case descriptors and the discovered test tree.
//!
//! A [`TestCaseDescriptor`] is what a test framework reports for one case
//! before anything runs. The hierarchy builder turns a flat list of them into
//! a [`TestNode`] tree; the tree is immutable once built and is shared behind
//! an `Arc` by its owners.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Descriptors
// ============================================================================

/// Metadata for one discovered test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDescriptor {
    /// Stable, framework-assigned unique id. Opaque to the driver.
    pub id: String,
    /// Fully qualified, dot-separated type (fixture) name. May be empty.
    pub type_name: String,
    /// Test method name.
    pub method_name: String,
    /// Arguments of a parameterized case. Empty for plain cases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub argument_values: Vec<Value>,
}

impl TestCaseDescriptor {
    /// Create a descriptor for a non-parameterized case.
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        TestCaseDescriptor {
            id: id.into(),
            type_name: type_name.into(),
            method_name: method_name.into(),
            argument_values: Vec::new(),
        }
    }

    /// Attach argument values, making this a parameterized case.
    pub fn with_arguments(mut self, argument_values: Vec<Value>) -> Self {
        self.argument_values = argument_values;
        self
    }

    /// Whether this case carries arguments.
    pub fn is_parameterized(&self) -> bool {
        !self.argument_values.is_empty()
    }

    /// Display name: `method(args)` for parameterized cases, else `method`.
    pub fn display_name(&self) -> String {
        display_name_for(&self.method_name, &self.argument_values)
    }
}

/// Render one argument value for a display segment.
///
/// `null` stays bare; everything else is rendered as a double-quoted string
/// of its textual form (strings are not quoted twice).
pub fn render_argument(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => format!("\"{}\"", s),
        other => format!("\"{}\"", other),
    }
}

pub(crate) fn display_name_for(method_name: &str, argument_values: &[Value]) -> String {
    if argument_values.is_empty() {
        return method_name.to_string();
    }
    let args: Vec<String> = argument_values.iter().map(render_argument).collect();
    format!("{}({})", method_name, args.join(","))
}

// ============================================================================
// Test Tree
// ============================================================================

/// A leaf of the discovered tree: one runnable test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestLeaf {
    pub id: String,
    pub type_name: String,
    pub method_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub argument_values: Vec<Value>,
    pub display_name: String,
}

impl TestLeaf {
    /// Build a leaf from the descriptor it represents.
    pub fn from_descriptor(descriptor: &TestCaseDescriptor) -> Self {
        TestLeaf {
            id: descriptor.id.clone(),
            type_name: descriptor.type_name.clone(),
            method_name: descriptor.method_name.clone(),
            argument_values: descriptor.argument_values.clone(),
            display_name: descriptor.display_name(),
        }
    }

    /// The type name split into namespace and fixture parts.
    ///
    /// `"A.B.Fixture"` gives `("A.B", "Fixture")`; a name without dots has an
    /// empty namespace.
    pub fn fixture_parts(&self) -> (&str, &str) {
        match self.type_name.rsplit_once('.') {
            Some((namespace, fixture)) => (namespace, fixture),
            None => ("", self.type_name.as_str()),
        }
    }
}

/// A node of the discovered hierarchy.
///
/// Groups carry a name segment and children in first-seen order; leaves carry
/// the case metadata. A node is a leaf iff it has no children collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TestNode {
    Group {
        name: String,
        children: Vec<TestNode>,
    },
    Leaf(TestLeaf),
}

impl TestNode {
    /// Display name of the node (the group segment or the leaf display name).
    pub fn name(&self) -> &str {
        match self {
            TestNode::Group { name, .. } => name,
            TestNode::Leaf(leaf) => &leaf.display_name,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TestNode::Leaf(_))
    }

    /// Children of a group, `None` for a leaf.
    pub fn children(&self) -> Option<&[TestNode]> {
        match self {
            TestNode::Group { children, .. } => Some(children),
            TestNode::Leaf(_) => None,
        }
    }

    /// All leaves below (and including) this node, depth first.
    pub fn leaves(&self) -> Vec<&TestLeaf> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    /// Ids of all leaves below this node, depth first.
    pub fn leaf_ids(&self) -> Vec<String> {
        self.leaves().into_iter().map(|l| l.id.clone()).collect()
    }

    /// Find the leaf with the given id.
    pub fn find_leaf(&self, id: &str) -> Option<&TestLeaf> {
        match self {
            TestNode::Leaf(leaf) if leaf.id == id => Some(leaf),
            TestNode::Leaf(_) => None,
            TestNode::Group { children, .. } => children.iter().find_map(|c| c.find_leaf(id)),
        }
    }

    /// Walk down the tree by group names, e.g. `["A", "B"]`.
    pub fn find_path(&self, path: &[&str]) -> Option<&TestNode> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        self.children()?
            .iter()
            .find(|c| c.name() == *first)
            .and_then(|c| c.find_path(rest))
    }
}

fn collect_leaves<'a>(node: &'a TestNode, out: &mut Vec<&'a TestLeaf>) {
    match node {
        TestNode::Leaf(leaf) => out.push(leaf),
        TestNode::Group { children, .. } => {
            for child in children {
                collect_leaves(child, out);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_argument_quotes_non_null_values() {
        assert_eq!(render_argument(&Value::Null), "null");
        assert_eq!(render_argument(&json!("abc")), "\"abc\"");
        assert_eq!(render_argument(&json!(42)), "\"42\"");
        assert_eq!(render_argument(&json!(true)), "\"true\"");
    }

    #[test]
    fn test_display_name_plain_and_parameterized() {
        let plain = TestCaseDescriptor::new("1", "A.B", "Test1");
        assert_eq!(plain.display_name(), "Test1");

        let theory = TestCaseDescriptor::new("2", "A.B", "Theory")
            .with_arguments(vec![json!(1), Value::Null, json!("x")]);
        assert_eq!(theory.display_name(), "Theory(\"1\",null,\"x\")");
    }

    #[test]
    fn test_fixture_parts() {
        let leaf = TestLeaf::from_descriptor(&TestCaseDescriptor::new("1", "A.B.Fixture", "T"));
        assert_eq!(leaf.fixture_parts(), ("A.B", "Fixture"));

        let leaf = TestLeaf::from_descriptor(&TestCaseDescriptor::new("1", "Fixture", "T"));
        assert_eq!(leaf.fixture_parts(), ("", "Fixture"));
    }

    #[test]
    fn test_node_serialization_is_tagged() {
        let node = TestNode::Group {
            name: "A".to_string(),
            children: vec![TestNode::Leaf(TestLeaf::from_descriptor(
                &TestCaseDescriptor::new("id-1", "A", "Test1"),
            ))],
        };
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["node"], "group");
        assert_eq!(value["children"][0]["node"], "leaf");
        assert_eq!(value["children"][0]["id"], "id-1");
        assert!(value["children"][0].get("children").is_none());

        let back: TestNode = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_find_leaf_and_path() {
        let node = TestNode::Group {
            name: String::new(),
            children: vec![TestNode::Group {
                name: "A".to_string(),
                children: vec![TestNode::Leaf(TestLeaf::from_descriptor(
                    &TestCaseDescriptor::new("x", "A", "Test1"),
                ))],
            }],
        };
        assert_eq!(node.find_leaf("x").map(|l| l.method_name.as_str()), Some("Test1"));
        assert!(node.find_leaf("missing").is_none());
        assert_eq!(node.find_path(&["A"]).map(|n| n.name()), Some("A"));
        assert_eq!(node.find_path(&["A", "Test1"]).map(|n| n.is_leaf()), Some(true));
        assert!(node.find_path(&["B"]).is_none());
    }
}
