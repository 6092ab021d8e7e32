//! Built-in overlay plugins.

pub mod arcs;
pub mod bubbles;
pub mod graticule;
pub mod labels;
pub mod legend;

use crate::scene::{LayerId, Node, NodeId, SceneGraph, Shape};

/// Keyed upsert for overlays without an animated lifecycle: new keys are
/// appended, surviving keys get their shape replaced, stale keys are
/// removed at once. Returns the node for every item, in order.
pub(crate) fn sync_static<S: SceneGraph>(
    scene: &mut S,
    layer: LayerId,
    class: &str,
    items: Vec<(String, Shape)>,
) -> Vec<NodeId> {
    let keys: Vec<String> = items.iter().map(|(k, _)| k.clone()).collect();
    let join = scene.join(layer, class, &keys);
    let mut ids = vec![None; items.len()];
    let mut shapes: Vec<Option<Shape>> = items.into_iter().map(|(_, s)| Some(s)).collect();

    for &i in &join.enter {
        if let Some(shape) = shapes[i].take() {
            ids[i] = Some(scene.append(Node::new(keys[i].clone(), class, layer, shape)));
        }
    }
    for &(i, id) in &join.update {
        if let (Some(node), Some(shape)) = (scene.node_mut(id), shapes[i].take()) {
            node.shape = shape;
        }
        ids[i] = Some(id);
    }
    for id in join.exit {
        scene.remove(id);
    }
    ids.into_iter().flatten().collect()
}
