//! Export hierarchy construction
//!
//! Flattens a filtered object list into a tree of export nodes. An object
//! whose name carries the `#` root marker (or any object when merging is
//! disabled) starts a new node; other objects merge into the current node,
//! contributing their geometry through a recorded matrix stack - the chain
//! of merged ancestors whose local transforms compose into the object's
//! transform relative to the node.
//!
//! Nodes live in an index-addressed arena and the traversal runs over an
//! explicit worklist; the matrix stack is an immutable value per visit.

use glam::Mat4;
use hashbrown::HashSet;

use crate::scene::{ObjectId, ObjectKind, Scene};

/// Name marker declaring an object a node root.
pub fn is_root_name(name: &str) -> bool {
    name.starts_with('#')
}

/// Expand a selection into the exportable object list: ancestors included,
/// filtered to mesh and empty objects, deduplicated, ordered by ancestor
/// depth (stable within a depth).
pub fn exportable_objects(scene: &Scene, selection: &[ObjectId]) -> Vec<ObjectId> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut expanded = Vec::new();
    for &id in selection {
        if seen.insert(id) {
            expanded.push(id);
        }
        let mut parent = scene.object(id).parent;
        while let Some(ancestor) = parent {
            if seen.insert(ancestor) {
                expanded.push(ancestor);
            }
            parent = scene.object(ancestor).parent;
        }
    }

    expanded.retain(|&id| {
        matches!(
            scene.object(id).kind,
            ObjectKind::Mesh | ObjectKind::Empty
        )
    });
    expanded.sort_by_key(|&id| scene.ancestor_depth(id));
    expanded
}

/// Index of a node in its [`Hierarchy`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub usize);

/// A contributing object and its matrix stack. Node roots record an empty
/// stack (their own local transform is applied as the node transform, not
/// through the stack).
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub object: ObjectId,
    pub stack: Vec<ObjectId>,
}

/// One node of the export hierarchy.
#[derive(Debug, Clone)]
pub struct HierarchyNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub source_object: Option<ObjectId>,
    /// Created through the root path (name marker, disabled merging, or the
    /// tree root itself).
    pub is_node_root: bool,
    /// Contributing objects in visit order.
    pub entries: Vec<ObjectEntry>,
}

impl HierarchyNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            source_object: None,
            is_node_root: false,
            entries: Vec::new(),
        }
    }

    pub fn entry(&self, object: ObjectId) -> Option<&ObjectEntry> {
        self.entries.iter().find(|e| e.object == object)
    }
}

/// The built export hierarchy: a node arena whose slot 0 is the tree root.
/// Pruned nodes stay in the arena but are unlinked from their parent.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: Vec<HierarchyNode>,
}

impl Hierarchy {
    /// Build the hierarchy for `objects` (an exportable list as produced by
    /// [`exportable_objects`]) under a root node called `root_name`.
    pub fn build(scene: &Scene, objects: &[ObjectId], root_name: &str, merge: bool) -> Self {
        let mut root = HierarchyNode::new(root_name.to_string(), None);
        root.is_node_root = true;
        let mut builder = Builder {
            scene,
            merge,
            allowed: objects.iter().copied().collect(),
            visited: HashSet::new(),
            nodes: vec![root],
        };

        // Seeds are pushed in reverse so the worklist pops them in list
        // order, each completing its subtree before the next starts.
        let mut worklist: Vec<Visit> = objects
            .iter()
            .rev()
            .map(|&object| Visit {
                object,
                node: NodeId(0),
                parent_node: NodeId(0),
                stack: Vec::new(),
            })
            .collect();

        while let Some(visit) = worklist.pop() {
            builder.visit(visit, &mut worklist);
        }

        builder.prune();
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &HierarchyNode {
        &self.nodes[id.0]
    }

    /// The transform of `object` relative to `node`: the composition of the
    /// recorded stack's local transforms, oldest ancestor first.
    pub fn object_matrix(&self, scene: &Scene, node: NodeId, object: ObjectId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        if let Some(entry) = self.node(node).entry(object) {
            for &stacked in &entry.stack {
                matrix *= scene.export_local(stacked);
            }
        }
        matrix
    }

    /// Nodes reachable from the root, depth first, parents before children.
    pub fn flatten(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.node(id).children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

struct Visit {
    object: ObjectId,
    /// Node receiving this object's geometry if it merges.
    node: NodeId,
    /// Node new export nodes attach under.
    parent_node: NodeId,
    stack: Vec<ObjectId>,
}

struct Builder<'a> {
    scene: &'a Scene,
    merge: bool,
    allowed: HashSet<ObjectId>,
    visited: HashSet<ObjectId>,
    nodes: Vec<HierarchyNode>,
}

impl Builder<'_> {
    fn visit(&mut self, visit: Visit, worklist: &mut Vec<Visit>) {
        if !self.allowed.contains(&visit.object) || !self.visited.insert(visit.object) {
            return;
        }

        let object = self.scene.object(visit.object);
        if is_root_name(&object.name) || !self.merge {
            // Start a new export node; the matrix stack resets and the
            // object's own transform becomes the node transform.
            let node = self.create_node(visit.object, visit.parent_node, true);
            self.nodes[node.0].entries.push(ObjectEntry {
                object: visit.object,
                stack: Vec::new(),
            });
            self.push_children(visit.object, node, node, Vec::new(), worklist);
        } else {
            let mut stack = visit.stack;
            stack.push(visit.object);
            self.nodes[visit.node.0].entries.push(ObjectEntry {
                object: visit.object,
                stack: stack.clone(),
            });

            if !object.children.is_empty() {
                // Children of a merge-group member attach their own export
                // nodes under a fresh node named after this object.
                let parent_node = self.create_node(visit.object, visit.parent_node, false);
                self.push_children(visit.object, visit.node, parent_node, stack, worklist);
            }
        }
    }

    fn push_children(
        &mut self,
        object: ObjectId,
        node: NodeId,
        parent_node: NodeId,
        stack: Vec<ObjectId>,
        worklist: &mut Vec<Visit>,
    ) {
        for &child in self.scene.object(object).children.iter().rev() {
            worklist.push(Visit {
                object: child,
                node,
                parent_node,
                stack: stack.clone(),
            });
        }
    }

    fn create_node(&mut self, object: ObjectId, parent: NodeId, is_node_root: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = HierarchyNode::new(self.scene.object(object).name.clone(), Some(parent));
        node.source_object = Some(object);
        node.is_node_root = is_node_root;
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Drop nodes that ended up with no children and no contributing
    /// objects. Children are created after their parents, so a reverse
    /// arena walk prunes chains of empties bottom up.
    fn prune(&mut self) {
        for index in (1..self.nodes.len()).rev() {
            if self.nodes[index].children.is_empty() && self.nodes[index].entries.is_empty() {
                if let Some(parent) = self.nodes[index].parent {
                    self.nodes[parent.0].children.retain(|c| c.0 != index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MeshSource, SceneObject};
    use glam::{Mat4, Vec3};

    fn mesh_object(name: &str, parent: Option<ObjectId>) -> SceneObject {
        let mut object = SceneObject::new(name, ObjectKind::Mesh);
        object.parent = parent;
        let mut mesh = MeshSource::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y]);
        mesh.push_polygon(0, vec![0, 1, 2]);
        mesh.materials.push(String::new());
        object.mesh = Some(mesh);
        object
    }

    fn empty_object(name: &str, parent: Option<ObjectId>) -> SceneObject {
        let mut object = SceneObject::new(name, ObjectKind::Empty);
        object.parent = parent;
        object
    }

    #[test]
    fn merge_collapses_unmarked_descendants() {
        let mut scene = Scene::new();
        let root = scene.add(empty_object("#Root", None));
        let a = scene.add(mesh_object("a", Some(root)));
        let b = scene.add(mesh_object("b", Some(a)));

        let objects = exportable_objects(&scene, &[root, a, b]);
        let hierarchy = Hierarchy::build(&scene, &objects, "model", true);

        let flattened = hierarchy.flatten();
        assert_eq!(flattened.len(), 2); // synthetic root + "#Root"
        let node = hierarchy.node(flattened[1]);
        assert_eq!(node.name, "#Root");
        assert_eq!(node.entries.len(), 3);
        assert_eq!(node.entry(a).unwrap().stack, vec![a]);
        assert_eq!(node.entry(b).unwrap().stack, vec![a, b]);
        assert!(node.entry(root).unwrap().stack.is_empty());
    }

    #[test]
    fn nested_root_marker_splits_the_group() {
        let mut scene = Scene::new();
        let root = scene.add(empty_object("#Root", None));
        let a = scene.add(mesh_object("a", Some(root)));
        let b = scene.add(mesh_object("#Sub", Some(a)));
        let c = scene.add(mesh_object("c", Some(b)));

        let objects = exportable_objects(&scene, &[root, a, b, c]);
        let hierarchy = Hierarchy::build(&scene, &objects, "model", true);
        let flattened = hierarchy.flatten();

        // model / #Root / a (holder) / #Sub
        let names: Vec<&str> = flattened
            .iter()
            .map(|&id| hierarchy.node(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["model", "#Root", "a", "#Sub"]);

        let sub = hierarchy.node(flattened[3]);
        assert!(sub.is_node_root);
        assert_eq!(sub.entries.len(), 2);
        assert_eq!(sub.entry(c).unwrap().stack, vec![c]);
    }

    #[test]
    fn disabled_merging_gives_every_object_a_node() {
        let mut scene = Scene::new();
        let root = scene.add(mesh_object("root", None));
        let a = scene.add(mesh_object("a", Some(root)));
        let b = scene.add(mesh_object("b", Some(root)));

        let objects = exportable_objects(&scene, &[root, a, b]);
        let hierarchy = Hierarchy::build(&scene, &objects, "model", false);
        // Synthetic root + one node per object.
        assert_eq!(hierarchy.flatten().len(), 4);
        for &id in &hierarchy.flatten()[1..] {
            assert!(hierarchy.node(id).is_node_root);
            assert_eq!(hierarchy.node(id).entries.len(), 1);
        }
    }

    #[test]
    fn holder_chains_prune_completely() {
        // Unmarked empties all merge into the synthetic root; the holder
        // nodes created for their children collect no root children and
        // prune away bottom up, including the chained holder.
        let mut scene = Scene::new();
        let top = scene.add(empty_object("top", None));
        let mid = scene.add(empty_object("mid", Some(top)));
        let leaf = scene.add(empty_object("leaf", Some(mid)));

        let objects = exportable_objects(&scene, &[top, mid, leaf]);
        let hierarchy = Hierarchy::build(&scene, &objects, "model", true);

        let flattened = hierarchy.flatten();
        assert_eq!(flattened.len(), 1);
        let root = hierarchy.node(flattened[0]);
        assert_eq!(root.name, "model");
        // The empties still contribute (zero-vertex) entries to the root.
        assert_eq!(root.entries.len(), 3);
    }

    #[test]
    fn marked_empty_without_geometry_keeps_its_node() {
        let mut scene = Scene::new();
        let root = scene.add(empty_object("#Pivot", None));

        let objects = exportable_objects(&scene, &[root]);
        let hierarchy = Hierarchy::build(&scene, &objects, "model", true);

        let flattened = hierarchy.flatten();
        assert_eq!(flattened.len(), 2);
        assert_eq!(hierarchy.node(flattened[1]).name, "#Pivot");
    }

    #[test]
    fn ancestors_expand_and_sort_by_depth() {
        let mut scene = Scene::new();
        let root = scene.add(empty_object("root", None));
        let mid = scene.add(empty_object("mid", Some(root)));
        let leaf = scene.add(mesh_object("leaf", Some(mid)));
        let rig = scene.add(SceneObject::new("rig", ObjectKind::Armature));
        let _ = rig;

        let objects = exportable_objects(&scene, &[leaf, rig]);
        assert_eq!(objects, vec![root, mid, leaf]);
    }

    #[test]
    fn object_matrix_composes_stack_in_order() {
        let mut scene = Scene::new();
        let root = scene.add(empty_object("#Root", None));
        let mut a = mesh_object("a", Some(root));
        a.local_transform = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let a = scene.add(a);
        let mut b = mesh_object("b", Some(a));
        b.local_transform = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let b = scene.add(b);

        let objects = exportable_objects(&scene, &[root, a, b]);
        let hierarchy = Hierarchy::build(&scene, &objects, "model", true);
        let node = hierarchy.flatten()[1];

        let matrix = hierarchy.object_matrix(&scene, node, b);
        let translation = matrix.to_scale_rotation_translation().2;
        assert!((translation - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }
}
