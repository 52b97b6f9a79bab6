//! Groups a flat list of test-case descriptors into a [`TestNode`] tree.
//!
//! Each descriptor is keyed by its name segments: the dotted components of
//! its type name, then the method name, then (for parameterized cases) a
//! synthesized `method(args)` segment. Descriptors are grouped depth by depth
//! on those segments, so `[a.b.c, a.b.d, a.e]` becomes
//!
//! ```text
//!  (a)
//!   |-(b)
//!      |-(c)
//!      |-(d)
//!   |-(e)
//! ```
//!
//! Group order at every depth follows first occurrence after a stable sort
//! by `(type_name, method_name)`, not alphabetical order.

use std::collections::HashMap;

use crate::types::{display_name_for, TestCaseDescriptor, TestLeaf, TestNode};

/// Name segments used to place a descriptor in the tree.
pub fn name_segments(descriptor: &TestCaseDescriptor) -> Vec<String> {
    let mut segments: Vec<String> = if descriptor.type_name.is_empty() {
        Vec::new()
    } else {
        descriptor.type_name.split('.').map(str::to_string).collect()
    };
    segments.push(descriptor.method_name.clone());
    if descriptor.is_parameterized() {
        segments.push(display_segment(descriptor));
    }
    segments
}

/// The segment naming a single case: `method(args)` when parameterized,
/// otherwise the bare method name.
pub fn display_segment(descriptor: &TestCaseDescriptor) -> String {
    display_name_for(&descriptor.method_name, &descriptor.argument_values)
}

/// Build the test tree for one discovery pass.
///
/// Returns `None` for an empty input. The root is a group with an empty name.
/// When two descriptors share an id the later one wins and takes the earlier
/// one's position.
pub fn build_hierarchy(descriptors: Vec<TestCaseDescriptor>) -> Option<TestNode> {
    let mut descriptors = dedupe_last_wins(descriptors);
    if descriptors.is_empty() {
        return None;
    }

    descriptors.sort_by(|a, b| {
        a.type_name
            .cmp(&b.type_name)
            .then_with(|| a.method_name.cmp(&b.method_name))
    });

    let keyed: Vec<Keyed<'_>> = descriptors
        .iter()
        .map(|descriptor| Keyed {
            descriptor,
            segments: name_segments(descriptor),
        })
        .collect();
    let members: Vec<&Keyed<'_>> = keyed.iter().collect();

    Some(TestNode::Group {
        name: String::new(),
        children: group_children(&members, 0),
    })
}

struct Keyed<'a> {
    descriptor: &'a TestCaseDescriptor,
    segments: Vec<String>,
}

enum Slot<'k, 'a> {
    Leaf(&'k Keyed<'a>),
    Group(String, Vec<&'k Keyed<'a>>),
}

fn build_node(name: String, members: &[&Keyed<'_>], depth: usize) -> TestNode {
    if let [only] = members {
        if only.segments.len() == depth {
            return TestNode::Leaf(TestLeaf::from_descriptor(only.descriptor));
        }
    }
    TestNode::Group {
        name,
        children: group_children(members, depth),
    }
}

fn group_children(members: &[&Keyed<'_>], depth: usize) -> Vec<TestNode> {
    let mut slots: Vec<Slot<'_, '_>> = Vec::new();
    let mut group_index: HashMap<&str, usize> = HashMap::new();

    for member in members {
        match member.segments.get(depth) {
            // Segments ran out while siblings continue deeper.
            None => slots.push(Slot::Leaf(*member)),
            Some(segment) => match group_index.get(segment.as_str()) {
                Some(&index) => {
                    if let Slot::Group(_, group) = &mut slots[index] {
                        group.push(*member);
                    }
                }
                None => {
                    group_index.insert(segment.as_str(), slots.len());
                    slots.push(Slot::Group(segment.clone(), vec![*member]));
                }
            },
        }
    }

    slots
        .into_iter()
        .map(|slot| match slot {
            Slot::Leaf(member) => TestNode::Leaf(TestLeaf::from_descriptor(member.descriptor)),
            Slot::Group(name, group) => build_node(name, &group, depth + 1),
        })
        .collect()
}

fn dedupe_last_wins(descriptors: Vec<TestCaseDescriptor>) -> Vec<TestCaseDescriptor> {
    let mut out: Vec<TestCaseDescriptor> = Vec::with_capacity(descriptors.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for descriptor in descriptors {
        match positions.get(&descriptor.id) {
            Some(&index) => {
                tracing::warn!(id = %descriptor.id, "duplicate test case id; keeping the later descriptor");
                out[index] = descriptor;
            }
            None => {
                positions.insert(descriptor.id.clone(), out.len());
                out.push(descriptor);
            }
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
