//! Tiles and the per-tile fetch lifecycle.

use core::fmt;
use std::collections::HashMap;
use std::mem;
use std::sync::mpsc;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::warn;
use xt_core::ErrorKind;
use xt_core::TileError;
use xt_dom::Node;
use xt_js::DeferredScriptQueue;
use xt_js::ExpressionEnvironment;
use xt_js::JsExpressionEnvironment;
use xt_js::ScriptScheduler;
use xt_net::FetchCompletion;
use xt_net::FetchHandle;
use xt_net::FetchResponse;
use xt_net::FetchTicket;
use xt_net::Transport;

use crate::events::TileEvent;
use crate::events::TileEventKind;
use crate::geometry::Bounds;
use crate::geometry::Pixel;
use crate::geometry::Size;
use crate::host::ContainerId;
use crate::host::VisualHost;
use crate::import::ContentMode;
use crate::import::FragmentImporter;
use crate::layer::Layer;
use crate::layer::ScalableLayer;
use crate::params::evaluated_params;
use crate::params::extend_url;
use crate::params::identity_params;
use crate::scripts::execute_embedded_scripts;

pub const CONTENT_CLASS: &str = "xtile-content";
pub const ERROR_CLASS: &str = "xtile-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u64);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed,
}

/// One rendered region of a layer.
pub struct Tile {
    id: TileId,
    bounds: Bounds,
    position: Pixel,
    size: Size,
    state: LoadState,
    generation: u64,
    handle: Option<Box<dyn FetchHandle>>,
    container: Option<ContainerId>,
    content_mode: Option<ContentMode>,
    last_error: Option<TileError>,
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("id", &self.id)
            .field("bounds", &self.bounds)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("in_flight", &self.handle.is_some())
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl Tile {
    fn new(id: TileId, bounds: Bounds, position: Pixel, size: Size) -> Self {
        Self {
            id,
            bounds,
            position,
            size,
            state: LoadState::Idle,
            generation: 0,
            handle: None,
            container: None,
            content_mode: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn position(&self) -> Pixel {
        self.position
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_in_flight(&self) -> bool {
        self.handle.is_some()
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.container
    }

    /// Mode of the content currently shown, if any.
    pub fn content_mode(&self) -> Option<ContentMode> {
        self.content_mode
    }

    pub fn last_error(&self) -> Option<&TileError> {
        self.last_error.as_ref()
    }

    fn supersede(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
        self.generation = self.generation.saturating_add(1);
    }

    fn ensure_container<H: VisualHost>(&mut self, host: &mut H) -> ContainerId {
        match self.container {
            Some(container) => container,
            None => {
                let container = host.create_container();
                host.attach_container(container);
                self.container = Some(container);
                container
            }
        }
    }
}

/// Drives fetch, import and attachment for every tile of one layer.
///
/// Completions arrive on a channel and are applied by [`FetchCoordinator::pump`];
/// a completion is applied only while its ticket matches the tile's current
/// generation and live handle.
pub struct FetchCoordinator<L, T, H, S = DeferredScriptQueue, E = JsExpressionEnvironment> {
    layer: L,
    transport: T,
    host: H,
    scheduler: S,
    expressions: E,
    importer: FragmentImporter,
    tiles: HashMap<TileId, Tile>,
    next_tile: u64,
    sender: mpsc::Sender<FetchCompletion>,
    receiver: mpsc::Receiver<FetchCompletion>,
    events: Vec<TileEvent>,
}

impl<L, T, H> FetchCoordinator<L, T, H> {
    pub fn new(layer: L, transport: T, host: H) -> Self {
        Self::with_parts(
            layer,
            transport,
            host,
            DeferredScriptQueue::default(),
            JsExpressionEnvironment::default(),
        )
    }
}

impl<L, T, H, S, E> FetchCoordinator<L, T, H, S, E> {
    pub fn with_parts(layer: L, transport: T, host: H, scheduler: S, expressions: E) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            layer,
            transport,
            host,
            scheduler,
            expressions,
            importer: FragmentImporter::default(),
            tiles: HashMap::new(),
            next_tile: 0,
            sender,
            receiver,
            events: Vec::new(),
        }
    }

    pub fn with_importer(mut self, importer: FragmentImporter) -> Self {
        self.importer = importer;
        self
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn layer_mut(&mut self) -> &mut L {
        &mut self.layer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(&id)
    }

    pub fn tile_ids(&self) -> Vec<TileId> {
        let mut ids: Vec<TileId> = self.tiles.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Lifecycle events emitted since the previous call.
    pub fn take_events(&mut self) -> Vec<TileEvent> {
        mem::take(&mut self.events)
    }

    pub fn create_tile(&mut self, bounds: Bounds, position: Pixel, size: Size) -> TileId {
        self.next_tile = self.next_tile.saturating_add(1);
        let id = TileId(self.next_tile);
        self.tiles.insert(id, Tile::new(id, bounds, position, size));
        id
    }

    fn emit(&mut self, tile: TileId, kind: TileEventKind) {
        debug!(%tile, event = kind.as_str(), "tile event");
        self.events.push(TileEvent { tile, kind });
    }
}

impl<L, T, H, S, E> FetchCoordinator<L, T, H, S, E>
where
    L: Layer,
    T: Transport,
    H: VisualHost,
    S: ScriptScheduler,
    E: ExpressionEnvironment,
{
    /// Starts loading `id`, superseding any request still in flight for it.
    pub fn draw(&mut self, id: TileId) {
        let Some(tile) = self.tiles.get_mut(&id) else {
            debug!(tile = %id, "draw for unknown tile");
            return;
        };

        let reloading = tile.state == LoadState::Loading;
        tile.supersede();
        tile.state = LoadState::Loading;
        let container = tile.ensure_container(&mut self.host);
        self.host.set_visible(container, false);

        let ticket = FetchTicket {
            tile: id.0,
            generation: tile.generation,
        };
        let url = request_url(&self.layer, &self.expressions, id, &tile.bounds);
        debug!(tile = %id, generation = ticket.generation, url = url.as_str(), "issuing tile request");

        let issued = self.transport.fetch(&url, ticket, self.sender.clone());
        let kind = if reloading {
            TileEventKind::Reload
        } else {
            TileEventKind::LoadStart
        };
        self.emit(id, kind);

        match issued {
            Ok(handle) => {
                if let Some(tile) = self.tiles.get_mut(&id) {
                    tile.handle = Some(handle);
                }
            }
            Err(error) => self.fail(id, error),
        }
    }

    /// Applies every completion already delivered. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            if self.complete(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Blocks until no tile is loading. Returns `false` when `timeout` elapses first.
    pub fn pump_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self
            .tiles
            .values()
            .any(|tile| tile.state == LoadState::Loading)
        {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    self.complete(completion);
                }
                Err(_) => return false,
            }
        }
        true
    }

    /// Applies one completion unless it belongs to a superseded or cancelled request.
    pub fn complete(&mut self, completion: FetchCompletion) -> bool {
        let id = TileId(completion.ticket.tile);
        let Some(tile) = self.tiles.get_mut(&id) else {
            debug!(tile = %id, "completion for a removed tile");
            return false;
        };

        let current = tile.generation == completion.ticket.generation
            && tile
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_cancelled());
        if !current {
            debug!(
                tile = %id,
                generation = completion.ticket.generation,
                current = tile.generation,
                "discarding stale completion"
            );
            return false;
        }
        tile.handle = None;

        match completion.outcome {
            Ok(response) => self.succeed(id, response),
            Err(error) => self.fail(id, error),
        }
        true
    }

    fn succeed(&mut self, id: TileId, response: FetchResponse) {
        let imported = self
            .importer
            .import(self.layer.options(), &response.text, response.document);

        match imported {
            Ok(content) => self.attach(id, content.mode, content.nodes),
            Err(error) if error.is(ErrorKind::ContainerNotFound) => {
                debug!(tile = %id, %error, "nothing to import");
                self.attach(id, ContentMode::Xhtml, Vec::new());
            }
            Err(error) => self.fail(id, error),
        }
    }

    fn attach(&mut self, id: TileId, mode: ContentMode, nodes: Vec<Node>) {
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };
        let container = tile.ensure_container(&mut self.host);

        // Scheduled scripts run only once the scheduler is drained, after attachment.
        execute_embedded_scripts(
            &nodes,
            mode,
            self.importer.policy().scripts,
            &mut self.scheduler,
            &id.to_string(),
        );

        self.host.clear_children(container);
        self.host.append_children(container, nodes);
        self.host.set_class(container, CONTENT_CLASS);
        self.host.reposition(container, tile.position, tile.size);
        self.host.set_visible(container, true);

        tile.state = LoadState::Loaded;
        tile.content_mode = Some(mode);
        tile.last_error = None;
        self.emit(id, TileEventKind::LoadEnd);
    }

    fn fail(&mut self, id: TileId, error: TileError) {
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };
        warn!(tile = %id, %error, "tile load failed");

        let container = tile.ensure_container(&mut self.host);
        self.host.set_class(container, ERROR_CLASS);
        self.host.clear_children(container);
        self.host.reposition(container, tile.position, tile.size);
        self.host.set_visible(container, true);

        tile.handle = None;
        tile.state = LoadState::Failed;
        tile.content_mode = None;
        tile.last_error = Some(error);
        self.emit(id, TileEventKind::LoadEnd);
    }

    /// Aborts any request and releases the container. Safe to repeat.
    pub fn cancel(&mut self, id: TileId) {
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };

        let was_active = tile.state != LoadState::Idle;
        tile.supersede();
        tile.state = LoadState::Idle;
        tile.content_mode = None;
        if let Some(container) = tile.container.take() {
            self.host.detach_container(container);
            self.host.release_container(container);
        }

        if was_active {
            self.emit(id, TileEventKind::Unload);
        }
    }

    pub fn unload(&mut self, id: TileId) {
        self.cancel(id);
    }

    /// Cancels and forgets the tile.
    pub fn destroy(&mut self, id: TileId) {
        self.cancel(id);
        self.tiles.remove(&id);
    }

    /// Hides the tile's content without discarding it.
    pub fn clear(&mut self, id: TileId) {
        if let Some(container) = self.tiles.get(&id).and_then(|tile| tile.container) {
            self.host.set_visible(container, false);
        }
    }

    /// Moves the tile to new bounds and placement, optionally redrawing it.
    pub fn move_tile(&mut self, id: TileId, bounds: Bounds, position: Pixel, size: Size, redraw: bool) {
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };
        tile.bounds = bounds;
        tile.position = position;
        tile.size = size;
        if let Some(container) = tile.container {
            self.host.reposition(container, position, size);
        }

        if redraw {
            self.draw(id);
        }
    }
}

impl<T, H, S, E> FetchCoordinator<ScalableLayer, T, H, S, E>
where
    T: Transport,
    H: VisualHost,
    S: ScriptScheduler,
    E: ExpressionEnvironment,
{
    /// Points the layer at new content and redraws every tile.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.layer.set_url(url);
        for id in self.tile_ids() {
            self.draw(id);
        }
    }
}

fn request_url<L, E>(layer: &L, expressions: &E, tile: TileId, bounds: &Bounds) -> String
where
    L: Layer,
    E: ExpressionEnvironment,
{
    let options = layer.options();
    let mut params = Vec::new();

    if options.send_identity_params {
        let tile_id = tile.to_string();
        params.extend(identity_params(layer.identity(), Some(tile_id.as_str())));
    }
    if let Some(evaluated) = evaluated_params(expressions, &options.evaluated_params) {
        params.extend(evaluated);
    }

    extend_url(&layer.build_url(bounds), &params)
}

#[cfg(test)]
mod tests {
    use super::CONTENT_CLASS;
    use super::ERROR_CLASS;
    use super::FetchCoordinator;
    use super::LoadState;
    use super::TileId;
    use crate::events::LayerLoadEvent;
    use crate::events::LoadMonitor;
    use crate::events::TileEventKind;
    use crate::geometry::Bounds;
    use crate::geometry::Pixel;
    use crate::geometry::Size;
    use crate::host::SceneHost;
    use crate::import::ContentMode;
    use crate::layer::GridLayer;
    use crate::layer::LayerIdentity;
    use crate::layer::LayerOptions;
    use crate::layer::ScalableLayer;
    use std::cell::RefCell;
    use std::sync::mpsc;
    use xt_core::ErrorKind;
    use xt_core::TileError;
    use xt_core::TileResult;
    use xt_net::CancelFlag;
    use xt_net::FetchCompletion;
    use xt_net::FetchHandle;
    use xt_net::FetchResponse;
    use xt_net::FetchTicket;
    use xt_net::Transport;

    struct Recorded {
        url: String,
        ticket: FetchTicket,
        sender: mpsc::Sender<FetchCompletion>,
        flag: CancelFlag,
    }

    #[derive(Default)]
    struct RecordingTransport {
        requests: RefCell<Vec<Recorded>>,
        refuse: bool,
    }

    impl RecordingTransport {
        fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        fn count(&self) -> usize {
            self.requests.borrow().len()
        }

        fn url(&self, index: usize) -> String {
            self.requests.borrow()[index].url.clone()
        }

        fn is_cancelled(&self, index: usize) -> bool {
            self.requests.borrow()[index].flag.is_cancelled()
        }

        /// Delivers like a well-behaved transport: nothing after cancellation.
        fn respond(&self, index: usize, outcome: TileResult<FetchResponse>) {
            if !self.is_cancelled(index) {
                self.deliver_late(index, outcome);
            }
        }

        /// Delivers even when the request was cancelled.
        fn deliver_late(&self, index: usize, outcome: TileResult<FetchResponse>) {
            let requests = self.requests.borrow();
            let request = &requests[index];
            let _ = request.sender.send(FetchCompletion {
                ticket: request.ticket,
                outcome,
            });
        }
    }

    impl Transport for RecordingTransport {
        fn fetch(
            &mut self,
            url: &str,
            ticket: FetchTicket,
            completions: mpsc::Sender<FetchCompletion>,
        ) -> TileResult<Box<dyn FetchHandle>> {
            if self.refuse {
                return Err(TileError::transport("test.refused", "transport refused the request"));
            }
            let flag = CancelFlag::default();
            self.requests.borrow_mut().push(Recorded {
                url: url.to_owned(),
                ticket,
                sender: completions,
                flag: flag.clone(),
            });
            Ok(Box::new(flag))
        }
    }

    type TestCoordinator = FetchCoordinator<GridLayer, RecordingTransport, SceneHost>;

    fn grid_coordinator(options: LayerOptions) -> (TestCoordinator, TileId) {
        grid_coordinator_with(options, RecordingTransport::default())
    }

    fn grid_coordinator_with(options: LayerOptions, transport: RecordingTransport) -> (TestCoordinator, TileId) {
        let layer = GridLayer::new("http://tiles.test/t", [("layers", "base")], options);
        let mut coordinator = FetchCoordinator::new(layer, transport, SceneHost::new());
        let id = coordinator.create_tile(Bounds::new(0.0, 0.0, 1.0, 1.0), Pixel::new(10, 20), Size::new(256, 256));
        (coordinator, id)
    }

    fn state(coordinator: &TestCoordinator, id: TileId) -> LoadState {
        coordinator
            .tile(id)
            .map(|tile| tile.state())
            .unwrap_or_default()
    }

    fn markup(coordinator: &TestCoordinator, id: TileId) -> String {
        coordinator
            .tile(id)
            .and_then(|tile| tile.container())
            .and_then(|container| coordinator.host().markup(container))
            .unwrap_or_default()
    }

    fn class(coordinator: &TestCoordinator, id: TileId) -> Option<String> {
        coordinator
            .tile(id)
            .and_then(|tile| tile.container())
            .and_then(|container| coordinator.host().container(container))
            .and_then(|state| state.class.clone())
    }

    fn kinds(coordinator: &mut TestCoordinator) -> Vec<TileEventKind> {
        coordinator
            .take_events()
            .into_iter()
            .map(|event| event.kind)
            .collect()
    }

    #[test]
    fn double_draw_keeps_one_live_request() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator.draw(id);

        let transport = coordinator.transport();
        assert_eq!(transport.count(), 2);
        assert!(transport.is_cancelled(0));
        assert!(!transport.is_cancelled(1));
        assert_eq!(kinds(&mut coordinator), vec![TileEventKind::LoadStart, TileEventKind::Reload]);
        assert_eq!(state(&coordinator, id), LoadState::Loading);
    }

    #[test]
    fn late_delivery_of_a_superseded_request_is_discarded() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator.draw(id);

        coordinator.transport().deliver_late(0, Ok(FetchResponse::text("<p>old</p>")));
        coordinator.transport().respond(1, Ok(FetchResponse::text("<p>new</p>")));
        coordinator.transport().deliver_late(0, Ok(FetchResponse::text("<p>older</p>")));
        assert_eq!(coordinator.pump(), 1);

        assert_eq!(state(&coordinator, id), LoadState::Loaded);
        assert_eq!(markup(&coordinator, id), "<p>new</p>");
        assert_eq!(class(&coordinator, id).as_deref(), Some(CONTENT_CLASS));
        let shown = coordinator
            .tile(id)
            .and_then(|tile| tile.container())
            .and_then(|container| coordinator.host().container(container))
            .is_some_and(|container| container.visible && container.position == Pixel::new(10, 20));
        assert!(shown);
    }

    #[test]
    fn malformed_content_falls_back_to_html() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions {
            allow_html_fallback: true,
            ..LayerOptions::default()
        });
        coordinator.draw(id);
        coordinator.transport().respond(0, Ok(FetchResponse::text("<p>a<br>b")));
        coordinator.pump();

        assert_eq!(state(&coordinator, id), LoadState::Loaded);
        assert_eq!(coordinator.tile(id).and_then(|tile| tile.content_mode()), Some(ContentMode::Html));
        assert!(markup(&coordinator, id).contains(">a<br/>b</p>"));
    }

    #[test]
    fn malformed_content_without_fallback_fails() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator.transport().respond(0, Ok(FetchResponse::text("<p>a<br>b")));
        coordinator.pump();

        assert_eq!(state(&coordinator, id), LoadState::Failed);
        assert_eq!(markup(&coordinator, id), "");
        assert_eq!(class(&coordinator, id).as_deref(), Some(ERROR_CLASS));
        assert!(
            coordinator
                .tile(id)
                .and_then(|tile| tile.last_error())
                .is_some_and(|error| error.is(ErrorKind::MalformedContent))
        );
        assert_eq!(kinds(&mut coordinator), vec![TileEventKind::LoadStart, TileEventKind::LoadEnd]);
    }

    #[test]
    fn failure_replaces_previous_content_and_redraw_recovers() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator.transport().respond(0, Ok(FetchResponse::text("<p>one</p>")));
        coordinator.pump();
        assert_eq!(markup(&coordinator, id), "<p>one</p>");

        coordinator.draw(id);
        coordinator
            .transport()
            .respond(1, Err(TileError::transport("test.down", "connection reset")));
        coordinator.pump();
        assert_eq!(state(&coordinator, id), LoadState::Failed);
        assert_eq!(markup(&coordinator, id), "");

        coordinator.draw(id);
        coordinator.transport().respond(2, Ok(FetchResponse::text("<p>two</p>")));
        coordinator.pump();
        assert_eq!(state(&coordinator, id), LoadState::Loaded);
        assert_eq!(markup(&coordinator, id), "<p>two</p>");
    }

    #[test]
    fn refused_request_fails_immediately() {
        let (mut coordinator, id) = grid_coordinator_with(LayerOptions::default(), RecordingTransport::refusing());
        coordinator.draw(id);

        assert_eq!(state(&coordinator, id), LoadState::Failed);
        assert!(!coordinator.tile(id).is_some_and(|tile| tile.is_in_flight()));
        assert_eq!(kinds(&mut coordinator), vec![TileEventKind::LoadStart, TileEventKind::LoadEnd]);
    }

    #[test]
    fn container_children_are_imported() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions {
            container_id: Some("c".to_owned()),
            ..LayerOptions::default()
        });
        coordinator.draw(id);
        coordinator
            .transport()
            .respond(0, Ok(FetchResponse::text("<div><span id='c'><b>x</b>y</span></div>")));
        coordinator.pump();
        assert_eq!(markup(&coordinator, id), "<b>x</b>y");

        coordinator.draw(id);
        coordinator.transport().respond(1, Ok(FetchResponse::text("<div/>")));
        coordinator.pump();
        assert_eq!(state(&coordinator, id), LoadState::Loaded);
        assert_eq!(markup(&coordinator, id), "");
    }

    #[test]
    fn evaluated_params_substitute_empty_on_failure() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions {
            evaluated_params: vec![
                ("a".to_owned(), "1+1".to_owned()),
                ("b".to_owned(), "throwExpr()".to_owned()),
            ],
            ..LayerOptions::default()
        });
        coordinator.draw(id);

        let url = coordinator.transport().url(0);
        assert!(url.starts_with("http://tiles.test/t?LAYERS=base&BBOX=0%2C0%2C1%2C1"));
        assert!(url.ends_with("&a=2&b="), "{url}");
    }

    #[test]
    fn identity_params_are_sent_on_request() {
        let options = LayerOptions {
            send_identity_params: true,
            ..LayerOptions::default()
        };
        let layer = GridLayer::new("http://tiles.test/t", [("layers", "base")], options).with_identity(LayerIdentity {
            map_id: Some("map".to_owned()),
            map_container_id: None,
            layer_id: Some("roads".to_owned()),
        });
        let mut coordinator = FetchCoordinator::new(layer, RecordingTransport::default(), SceneHost::new());
        let id = coordinator.create_tile(Bounds::new(0.0, 0.0, 1.0, 1.0), Pixel::default(), Size::new(256, 256));
        coordinator.draw(id);

        let url = coordinator.transport().url(0);
        assert!(
            url.ends_with(concat!(
                "&OPENLAYERS_MAP_ID=map&OPENLAYERS_MAP_DIV_ID=",
                "&OPENLAYERS_LAYER_ID=roads&OPENLAYERS_TILE_ID=tile-1"
            )),
            "{url}"
        );
    }

    #[test]
    fn cancel_is_idempotent_and_releases_the_container() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator.cancel(id);
        coordinator.cancel(id);

        assert!(coordinator.transport().is_cancelled(0));
        assert_eq!(coordinator.host().live_containers(), 0);
        assert_eq!(state(&coordinator, id), LoadState::Idle);
        assert_eq!(kinds(&mut coordinator), vec![TileEventKind::LoadStart, TileEventKind::Unload]);

        coordinator.transport().respond(0, Ok(FetchResponse::text("<p>x</p>")));
        coordinator.transport().deliver_late(0, Ok(FetchResponse::text("<p>x</p>")));
        assert_eq!(coordinator.pump(), 0);
        assert_eq!(state(&coordinator, id), LoadState::Idle);
    }

    #[test]
    fn html_scripts_are_scheduled_and_xhtml_scripts_are_not() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions {
            html_only: true,
            ..LayerOptions::default()
        });
        coordinator.draw(id);
        coordinator
            .transport()
            .respond(0, Ok(FetchResponse::text("<p>x</p><script>go()</script>")));
        coordinator.pump();
        assert_eq!(coordinator.scheduler().len(), 1);

        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator
            .transport()
            .respond(0, Ok(FetchResponse::text("<div><script>go()</script></div>")));
        coordinator.pump();
        assert_eq!(coordinator.tile(id).and_then(|tile| tile.content_mode()), Some(ContentMode::Xhtml));
        assert!(coordinator.scheduler().is_empty());
    }

    #[test]
    fn destroy_forgets_the_tile() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator.destroy(id);

        assert!(coordinator.tile(id).is_none());
        assert_eq!(coordinator.host().live_containers(), 0);
        coordinator.transport().deliver_late(0, Ok(FetchResponse::text("<p>x</p>")));
        assert_eq!(coordinator.pump(), 0);
    }

    #[test]
    fn move_tile_repositions_and_clear_hides() {
        let (mut coordinator, id) = grid_coordinator(LayerOptions::default());
        coordinator.draw(id);
        coordinator.transport().respond(0, Ok(FetchResponse::text("<p>x</p>")));
        coordinator.pump();

        let bounds = Bounds::new(1.0, 1.0, 2.0, 2.0);
        coordinator.move_tile(id, bounds, Pixel::new(256, 0), Size::new(256, 256), false);
        coordinator.clear(id);

        let container = coordinator
            .tile(id)
            .and_then(|tile| tile.container())
            .and_then(|container| coordinator.host().container(container))
            .cloned();
        match container {
            Some(container) => {
                assert_eq!(container.position, Pixel::new(256, 0));
                assert!(!container.visible);
            }
            None => panic!("container exists"),
        }

        coordinator.move_tile(id, bounds, Pixel::new(256, 0), Size::new(256, 256), true);
        assert!(coordinator.transport().url(1).contains("BBOX=1%2C1%2C2%2C2"));
    }

    #[test]
    fn monitor_aggregates_tile_events() {
        let (mut coordinator, first) = grid_coordinator(LayerOptions::default());
        let second = coordinator.create_tile(Bounds::new(1.0, 0.0, 2.0, 1.0), Pixel::new(256, 0), Size::new(256, 256));
        let mut monitor = LoadMonitor::new();

        coordinator.draw(first);
        coordinator.draw(second);
        assert_eq!(monitor.observe_all(coordinator.take_events()), vec![LayerLoadEvent::LoadStart]);

        coordinator.transport().respond(0, Ok(FetchResponse::text("<p>1</p>")));
        coordinator.pump();
        assert!(monitor.observe_all(coordinator.take_events()).is_empty());

        coordinator.cancel(second);
        assert_eq!(monitor.observe_all(coordinator.take_events()), vec![LayerLoadEvent::LoadEnd]);
    }

    #[test]
    fn scalable_layer_redraws_on_url_change() {
        let layer = ScalableLayer::new("http://s.test/a.xhtml", Bounds::new(0.0, 0.0, 4.0, 2.0), None, LayerOptions::default());
        let mut coordinator = FetchCoordinator::new(layer, RecordingTransport::default(), SceneHost::new());
        let id = coordinator.create_tile(Bounds::new(0.0, 0.0, 4.0, 2.0), Pixel::default(), Size::new(400, 200));
        coordinator.draw(id);
        coordinator.set_url("http://s.test/b.xhtml");

        assert_eq!(coordinator.transport().count(), 2);
        assert_eq!(coordinator.transport().url(0), "http://s.test/a.xhtml");
        assert_eq!(coordinator.transport().url(1), "http://s.test/b.xhtml");
        assert!(coordinator.transport().is_cancelled(0));
    }
}
