//! Tiles of remote XHTML/HTML content: per-tile fetch lifecycle, fragment
//! import with namespace fidelity, and the layers that build tile requests.

pub mod events;
pub mod geometry;
pub mod host;
pub mod import;
pub mod layer;
pub mod params;
pub mod scripts;
pub mod tile;

pub use events::LayerLoadEvent;
pub use events::LoadMonitor;
pub use events::TileEvent;
pub use events::TileEventKind;
pub use geometry::Bounds;
pub use geometry::Pixel;
pub use geometry::Size;
pub use host::ContainerId;
pub use host::SceneHost;
pub use host::VisualHost;
pub use import::ContentMode;
pub use import::FragmentImporter;
pub use import::ImportPolicy;
pub use import::ImportStrategy;
pub use import::NamespaceContext;
pub use layer::GridLayer;
pub use layer::Layer;
pub use layer::LayerIdentity;
pub use layer::LayerOptions;
pub use layer::ScalableLayer;
pub use scripts::ScriptExecutionPolicy;
pub use tile::FetchCoordinator;
pub use tile::LoadState;
pub use tile::Tile;
pub use tile::TileId;
