//! Tile lifecycle signals and layer-level load aggregation.

use std::collections::HashSet;

use crate::tile::TileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileEventKind {
    LoadStart,
    /// A draw replaced a request that was still loading.
    Reload,
    LoadEnd,
    Unload,
}

impl TileEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadStart => "loadstart",
            Self::Reload => "reload",
            Self::LoadEnd => "loadend",
            Self::Unload => "unload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEvent {
    pub tile: TileId,
    pub kind: TileEventKind,
}

/// Aggregate signal for a layer made of many tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerLoadEvent {
    LoadStart,
    LoadEnd,
}

/// Folds tile signals into one loading indicator.
#[derive(Debug, Clone, Default)]
pub struct LoadMonitor {
    loading: HashSet<TileId>,
}

impl LoadMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        !self.loading.is_empty()
    }

    pub fn loading_tiles(&self) -> usize {
        self.loading.len()
    }

    pub fn observe(&mut self, event: TileEvent) -> Option<LayerLoadEvent> {
        match event.kind {
            TileEventKind::LoadStart | TileEventKind::Reload => {
                let was_idle = self.loading.is_empty();
                self.loading.insert(event.tile);
                was_idle.then_some(LayerLoadEvent::LoadStart)
            }
            TileEventKind::LoadEnd | TileEventKind::Unload => {
                let removed = self.loading.remove(&event.tile);
                (removed && self.loading.is_empty()).then_some(LayerLoadEvent::LoadEnd)
            }
        }
    }

    pub fn observe_all(&mut self, events: impl IntoIterator<Item = TileEvent>) -> Vec<LayerLoadEvent> {
        events
            .into_iter()
            .filter_map(|event| self.observe(event))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::LayerLoadEvent;
    use super::LoadMonitor;
    use super::TileEvent;
    use super::TileEventKind;
    use crate::tile::TileId;

    fn event(tile: u64, kind: TileEventKind) -> TileEvent {
        TileEvent {
            tile: TileId(tile),
            kind,
        }
    }

    #[test]
    fn first_start_and_last_end_are_reported() {
        let mut monitor = LoadMonitor::new();
        let signals = monitor.observe_all([
            event(1, TileEventKind::LoadStart),
            event(2, TileEventKind::LoadStart),
            event(1, TileEventKind::Reload),
            event(1, TileEventKind::LoadEnd),
            event(2, TileEventKind::Unload),
        ]);
        assert_eq!(signals, vec![LayerLoadEvent::LoadStart, LayerLoadEvent::LoadEnd]);
        assert!(!monitor.is_loading());
    }

    #[test]
    fn unrelated_end_is_ignored() {
        let mut monitor = LoadMonitor::new();
        assert_eq!(monitor.observe(event(7, TileEventKind::Unload)), None);
        assert_eq!(monitor.observe(event(1, TileEventKind::LoadStart)), Some(LayerLoadEvent::LoadStart));
        assert_eq!(monitor.observe(event(2, TileEventKind::LoadEnd)), None);
        assert_eq!(monitor.loading_tiles(), 1);
    }
}
