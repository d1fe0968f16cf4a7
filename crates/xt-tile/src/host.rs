//! Visual containers that receive imported tile content.

use std::collections::HashMap;
use xt_dom::Node;
use xt_dom::nodes_to_markup;

use crate::geometry::Pixel;
use crate::geometry::Size;

/// Opaque handle to a host-owned container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub u64);

/// Rendering surface the coordinator drives. Calls on unknown ids are ignored.
pub trait VisualHost {
    fn create_container(&mut self) -> ContainerId;

    fn attach_container(&mut self, container: ContainerId);

    fn detach_container(&mut self, container: ContainerId);

    /// Frees the container; its id is not reused.
    fn release_container(&mut self, container: ContainerId);

    fn clear_children(&mut self, container: ContainerId);

    fn append_children(&mut self, container: ContainerId, children: Vec<Node>);

    fn set_visible(&mut self, container: ContainerId, visible: bool);

    fn reposition(&mut self, container: ContainerId, position: Pixel, size: Size);

    fn set_class(&mut self, container: ContainerId, class: &str);
}

/// Observable state of one container in a [`SceneHost`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub attached: bool,
    pub visible: bool,
    pub position: Pixel,
    pub size: Size,
    pub class: Option<String>,
    pub children: Vec<Node>,
}

/// In-memory host keeping every container as plain data.
#[derive(Debug, Default)]
pub struct SceneHost {
    next_id: u64,
    containers: HashMap<ContainerId, ContainerState>,
}

impl SceneHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(&self, container: ContainerId) -> Option<&ContainerState> {
        self.containers.get(&container)
    }

    pub fn live_containers(&self) -> usize {
        self.containers.len()
    }

    pub fn markup(&self, container: ContainerId) -> Option<String> {
        self.container(container)
            .map(|state| nodes_to_markup(&state.children))
    }

    fn state_mut(&mut self, container: ContainerId) -> Option<&mut ContainerState> {
        self.containers.get_mut(&container)
    }
}

impl VisualHost for SceneHost {
    fn create_container(&mut self) -> ContainerId {
        self.next_id += 1;
        let id = ContainerId(self.next_id);
        self.containers.insert(id, ContainerState::default());
        id
    }

    fn attach_container(&mut self, container: ContainerId) {
        if let Some(state) = self.state_mut(container) {
            state.attached = true;
        }
    }

    fn detach_container(&mut self, container: ContainerId) {
        if let Some(state) = self.state_mut(container) {
            state.attached = false;
        }
    }

    fn release_container(&mut self, container: ContainerId) {
        self.containers.remove(&container);
    }

    fn clear_children(&mut self, container: ContainerId) {
        if let Some(state) = self.state_mut(container) {
            state.children.clear();
        }
    }

    fn append_children(&mut self, container: ContainerId, children: Vec<Node>) {
        if let Some(state) = self.state_mut(container) {
            state.children.extend(children);
        }
    }

    fn set_visible(&mut self, container: ContainerId, visible: bool) {
        if let Some(state) = self.state_mut(container) {
            state.visible = visible;
        }
    }

    fn reposition(&mut self, container: ContainerId, position: Pixel, size: Size) {
        if let Some(state) = self.state_mut(container) {
            state.position = position;
            state.size = size;
        }
    }

    fn set_class(&mut self, container: ContainerId, class: &str) {
        if let Some(state) = self.state_mut(container) {
            state.class = Some(class.to_owned());
        }
    }
}
