use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing::warn;
use xt_core::TileError;
use xt_core::TileResult;
use xt_js::JsRuntime;
use xt_js::JsRuntimeConfig;
use xt_net::HttpTransport;
use xt_net::HttpTransportConfig;
use xt_net::TrustStoreMode;
use xt_tile::Bounds;
use xt_tile::FetchCoordinator;
use xt_tile::FragmentImporter;
use xt_tile::GridLayer;
use xt_tile::ImportPolicy;
use xt_tile::LayerOptions;
use xt_tile::Pixel;
use xt_tile::SceneHost;
use xt_tile::Size;
use xt_xhtml::XhtmlParser;

const DEFAULT_BBOX: &str = "-180,-90,180,90";
const DEFAULT_SIZE: &str = "256x256";
const LOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct ProbeArgs {
    url: String,
    bounds: Bounds,
    size: Size,
    options: LayerOptions,
    trust_store: TrustStoreMode,
}

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("xtile-probe: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> TileResult<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let policy = ImportPolicy::from_env()?;

    let layer = GridLayer::new(args.url.as_str(), Vec::<(String, String)>::new(), args.options)
        .with_tile_size(args.size);
    let transport = HttpTransport::new(HttpTransportConfig {
        trust_store: args.trust_store,
        ..HttpTransportConfig::default()
    });
    let mut coordinator = FetchCoordinator::new(layer, transport, SceneHost::new())
        .with_importer(FragmentImporter::new(XhtmlParser::default(), policy));

    let tile = coordinator.create_tile(args.bounds, Pixel::default(), args.size);
    coordinator.draw(tile);
    if !coordinator.pump_until_idle(LOAD_TIMEOUT) {
        warn!(timeout_secs = LOAD_TIMEOUT.as_secs(), "tile still loading");
    }

    let report = JsRuntime::new(JsRuntimeConfig::default()).run_deferred(coordinator.scheduler_mut());
    if report.scripts_seen > 0 {
        info!(
            executed = report.scripts_executed,
            failed = report.scripts_failed,
            skipped = report.scripts_skipped,
            "ran embedded scripts"
        );
    }

    let Some(state) = coordinator.tile(tile) else {
        return Err(TileError::configuration("probe.tile.missing", "tile disappeared"));
    };
    println!("state: {:?}", state.state());
    if let Some(mode) = state.content_mode() {
        println!("mode: {}", mode.as_str());
    }
    if let Some(error) = state.last_error() {
        println!("error: {error}");
    }
    if let Some(markup) = state
        .container()
        .and_then(|container| coordinator.host().markup(container))
    {
        println!("{markup}");
    }

    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> TileResult<ProbeArgs> {
    let mut url = None;
    let mut bbox = DEFAULT_BBOX.to_owned();
    let mut size = DEFAULT_SIZE.to_owned();
    let mut options = LayerOptions::default();
    let mut trust_store = TrustStoreMode::default();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--url" => url = Some(value_of(&arg, args.next())?),
            "--bbox" => bbox = value_of(&arg, args.next())?,
            "--size" => size = value_of(&arg, args.next())?,
            "--container-id" => options.container_id = Some(value_of(&arg, args.next())?),
            "--html-only" => options.html_only = true,
            "--fallback" => options.allow_html_fallback = true,
            "--trust" => {
                let name = value_of(&arg, args.next())?;
                trust_store = TrustStoreMode::from_name(&name).ok_or_else(|| {
                    TileError::configuration(
                        "probe.args.trust_store",
                        format!("unsupported trust store `{name}` (expected: webpki|os|webpki+os)"),
                    )
                })?;
            }
            other => {
                return Err(TileError::configuration(
                    "probe.args.unknown",
                    format!("unknown argument `{other}`"),
                ));
            }
        }
    }

    let url = url.ok_or_else(|| TileError::configuration("probe.args.url", "--url is required"))?;
    let bounds = Bounds::from_bbox(&bbox).ok_or_else(|| {
        TileError::configuration("probe.args.bbox", format!("invalid bbox `{bbox}`"))
    })?;
    let size = Size::from_dimensions(&size).ok_or_else(|| {
        TileError::configuration("probe.args.size", format!("invalid size `{size}`"))
    })?;

    Ok(ProbeArgs {
        url,
        bounds,
        size,
        options,
        trust_store,
    })
}

fn value_of(flag: &str, value: Option<String>) -> TileResult<String> {
    value.ok_or_else(|| {
        TileError::configuration("probe.args.missing_value", format!("missing value after {flag}"))
    })
}
