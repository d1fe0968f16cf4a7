//! Layers: the URL builders and per-layer options a tile is drawn with.

use xt_net::append_query;
use xt_net::parameter_string;

use crate::geometry::Bounds;
use crate::geometry::Pixel;
use crate::geometry::Size;

/// Per-layer import configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerOptions {
    /// Skip XHTML parsing entirely and treat responses as HTML.
    pub html_only: bool,
    /// Accept a response as HTML when it is not valid XHTML.
    pub allow_html_fallback: bool,
    /// Import only the children of the element with this `id`.
    pub container_id: Option<String>,
    pub send_identity_params: bool,
    /// Parameter name to expression, evaluated at request time in this order.
    pub evaluated_params: Vec<(String, String)>,
}

/// Identifiers reported through the identity request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerIdentity {
    pub map_id: Option<String>,
    pub map_container_id: Option<String>,
    pub layer_id: Option<String>,
}

/// Supplies request URLs and import options to the fetch coordinator.
pub trait Layer {
    fn build_url(&self, bounds: &Bounds) -> String;

    fn options(&self) -> &LayerOptions;

    fn identity(&self) -> &LayerIdentity;
}

/// Gridded layer whose tiles are requested with `BBOX`/`WIDTH`/`HEIGHT` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayer {
    url: String,
    params: Vec<(String, String)>,
    tile_size: Size,
    projection: Option<String>,
    options: LayerOptions,
    identity: LayerIdentity,
}

impl GridLayer {
    pub fn new<K, V>(
        url: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
        options: LayerOptions,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut layer = Self {
            url: url.into(),
            params: Vec::new(),
            tile_size: Size::new(256, 256),
            projection: None,
            options,
            identity: LayerIdentity::default(),
        };
        layer.merge_new_params(params);
        layer
    }

    /// WMS `GetMap` layer requesting XHTML; `params` override the WMS defaults.
    pub fn wms<K, V>(
        url: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
        options: LayerOptions,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let defaults = [
            ("SERVICE", "WMS"),
            ("VERSION", "1.1.1"),
            ("REQUEST", "GetMap"),
            ("STYLES", ""),
            ("FORMAT", "application/xhtml+xml"),
        ];
        let mut layer = Self::new(url, defaults, options);
        layer.merge_new_params(params);
        layer
    }

    pub fn with_tile_size(mut self, tile_size: Size) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_identity(mut self, identity: LayerIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Map projection code; `"none"` means no `PROJECTION` parameter.
    pub fn set_projection(&mut self, projection: Option<&str>) {
        self.projection = projection
            .filter(|code| *code != "none")
            .map(str::to_owned);
    }

    pub fn tile_size(&self) -> Size {
        self.tile_size
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn options_mut(&mut self) -> &mut LayerOptions {
        &mut self.options
    }

    /// Merges parameters with upper-cased names, replacing existing values.
    pub fn merge_new_params<K, V>(&mut self, params: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in params {
            upsert(&mut self.params, name.into().to_ascii_uppercase(), value.into());
        }
    }
}

impl Layer for GridLayer {
    fn build_url(&self, bounds: &Bounds) -> String {
        let mut all = self.params.clone();
        if let Some(projection) = &self.projection {
            upsert(&mut all, "PROJECTION".to_owned(), projection.clone());
        }
        upsert(&mut all, "BBOX".to_owned(), bounds.to_bbox());
        upsert(&mut all, "WIDTH".to_owned(), self.tile_size.width.to_string());
        upsert(&mut all, "HEIGHT".to_owned(), self.tile_size.height.to_string());

        // Parameters hard-coded in the base URL win over generated ones.
        let present = query_names(&self.url);
        let query = parameter_string(
            all.iter()
                .filter(|(name, _)| !present.contains(&name.to_ascii_uppercase()))
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );
        append_query(&self.url, &query)
    }

    fn options(&self) -> &LayerOptions {
        &self.options
    }

    fn identity(&self) -> &LayerIdentity {
        &self.identity
    }
}

fn upsert(params: &mut Vec<(String, String)>, name: String, value: String) {
    match params.iter_mut().find(|(existing, _)| *existing == name) {
        Some(entry) => entry.1 = value,
        None => params.push((name, value)),
    }
}

fn query_names(url: &str) -> Vec<String> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter_map(|pair| pair.split('=').next())
        .filter(|name| !name.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}

/// Single-tile layer covering a fixed extent, scaled with the map resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalableLayer {
    url: String,
    extent: Bounds,
    size: Option<Size>,
    aspect_ratio: f64,
    max_resolution: Option<f64>,
    options: LayerOptions,
    identity: LayerIdentity,
}

impl ScalableLayer {
    /// `size` is the native pixel size of the content, when known.
    pub fn new(
        url: impl Into<String>,
        extent: Bounds,
        size: Option<Size>,
        options: LayerOptions,
    ) -> Self {
        let aspect_ratio = match size {
            Some(size) if size.width > 0 && size.height > 0 => {
                (extent.height() / f64::from(size.height)) / (extent.width() / f64::from(size.width))
            }
            _ => extent.height() / extent.width(),
        };

        Self {
            url: url.into(),
            extent,
            size,
            aspect_ratio,
            max_resolution: None,
            options,
            identity: LayerIdentity::default(),
        }
    }

    pub fn with_identity(mut self, identity: LayerIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_max_resolution(mut self, resolution: f64) -> Self {
        self.max_resolution = Some(resolution);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Replaces the content URL; the caller redraws the tile.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn extent(&self) -> Bounds {
        self.extent
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    /// Explicit maximum resolution, else the one at which the content shows at native size.
    pub fn max_resolution(&self) -> Option<f64> {
        self.max_resolution.or_else(|| {
            self.size
                .filter(|size| size.width > 0)
                .map(|size| self.aspect_ratio * self.extent.width() / f64::from(size.width))
        })
    }

    /// Pixel size of the extent at `resolution` map units per pixel.
    pub fn tile_size(&self, resolution: f64) -> Size {
        if resolution <= 0.0 {
            return Size::default();
        }
        Size::new(
            to_pixels(self.extent.width() / resolution),
            to_pixels(self.extent.height() / resolution),
        )
    }

    /// Tile placement for a render: `top_left` is the extent's upper-left corner in layer pixels.
    pub fn placement(&self, resolution: f64, top_left: Pixel) -> (Pixel, Size) {
        (top_left, self.tile_size(resolution))
    }
}

fn to_pixels(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

impl Layer for ScalableLayer {
    fn build_url(&self, _bounds: &Bounds) -> String {
        self.url.clone()
    }

    fn options(&self) -> &LayerOptions {
        &self.options
    }

    fn identity(&self) -> &LayerIdentity {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::GridLayer;
    use super::Layer;
    use super::LayerOptions;
    use super::ScalableLayer;
    use crate::geometry::Bounds;
    use crate::geometry::Pixel;
    use crate::geometry::Size;

    #[test]
    fn grid_url_carries_bbox_and_size() {
        let mut layer = GridLayer::new("http://tiles.test/xhtml", [("layers", "roads")], LayerOptions::default())
            .with_tile_size(Size::new(256, 128));
        layer.set_projection(Some("EPSG:4326"));

        let url = layer.build_url(&Bounds::new(0.0, 0.0, 10.0, 5.0));
        assert_eq!(
            url,
            "http://tiles.test/xhtml?LAYERS=roads&PROJECTION=EPSG%3A4326&BBOX=0%2C0%2C10%2C5&WIDTH=256&HEIGHT=128"
        );
    }

    #[test]
    fn projection_none_is_omitted_and_url_params_win() {
        let mut layer = GridLayer::new("http://tiles.test/x?width=1", [("a", "b")], LayerOptions::default());
        layer.set_projection(Some("none"));
        let url = layer.build_url(&Bounds::new(0.0, 0.0, 1.0, 1.0));
        assert!(!url.contains("PROJECTION"));
        assert!(!url.contains("WIDTH="));
        assert!(url.starts_with("http://tiles.test/x?width=1&A=b&BBOX="));
    }

    #[test]
    fn merge_new_params_uppercases_and_replaces() {
        let mut layer = GridLayer::wms("http://wms.test/", [("format", "text/html")], LayerOptions::default());
        layer.merge_new_params([("layers", "a"), ("LAYERS", "b")]);
        let params = layer.params();
        assert!(params.contains(&("SERVICE".to_owned(), "WMS".to_owned())));
        assert!(params.contains(&("FORMAT".to_owned(), "text/html".to_owned())));
        assert!(params.contains(&("LAYERS".to_owned(), "b".to_owned())));
        assert_eq!(params.iter().filter(|(name, _)| name == "LAYERS").count(), 1);
    }

    #[test]
    fn scalable_layer_geometry() {
        let extent = Bounds::new(0.0, 0.0, 200.0, 100.0);
        let layer = ScalableLayer::new("http://s.test/plan.xhtml", extent, Some(Size::new(400, 100)), LayerOptions::default());

        assert!((layer.aspect_ratio() - 2.0).abs() < 1e-9);
        assert_eq!(layer.max_resolution(), Some(1.0));
        assert_eq!(layer.tile_size(0.5), Size::new(400, 200));
        assert_eq!(layer.placement(2.0, Pixel::new(5, 6)), (Pixel::new(5, 6), Size::new(100, 50)));
        assert_eq!(layer.build_url(&extent), "http://s.test/plan.xhtml");
    }

    #[test]
    fn scalable_layer_without_native_size() {
        let layer = ScalableLayer::new("u", Bounds::new(0.0, 0.0, 4.0, 2.0), None, LayerOptions::default());
        assert!((layer.aspect_ratio() - 0.5).abs() < 1e-9);
        assert_eq!(layer.max_resolution(), None);
        assert_eq!(layer.with_max_resolution(3.0).max_resolution(), Some(3.0));
    }
}
