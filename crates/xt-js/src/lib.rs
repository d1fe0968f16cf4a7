//! JavaScript evaluation for request parameters and imported scripts.

use std::collections::VecDeque;
use std::fmt;

use boa_engine::Context;
use boa_engine::Source;
use tracing::debug;
use tracing::warn;
use xt_core::ErrorKind;
use xt_core::TileError;
use xt_core::TileResult;

const BOOTSTRAP_ENV: &str = r#"
globalThis.window = globalThis;
globalThis.self = globalThis;
globalThis.console = {
  log: function () {},
  warn: function () {},
  error: function () {}
};
globalThis.__xt_timer_queue = [];
globalThis.__xt_timer_cancelled = {};
globalThis.__xt_next_timer_id = 1;
globalThis.setTimeout = function (callback, _delay) {
  var cb = callback;
  if (typeof cb !== "function") {
    var src = String(callback);
    cb = function () { (0, eval)(src); };
  }
  var id = globalThis.__xt_next_timer_id++;
  globalThis.__xt_timer_queue.push({ id: id, cb: cb });
  return id;
};
globalThis.clearTimeout = function (id) {
  globalThis.__xt_timer_cancelled[String(id)] = true;
};
globalThis.__xt_flush_timers = function (limit) {
  var maxRuns = Number(limit) || 1;
  var runs = 0;
  while (globalThis.__xt_timer_queue.length > 0 && runs < maxRuns) {
    var task = globalThis.__xt_timer_queue.shift();
    var cancelled = !!globalThis.__xt_timer_cancelled[String(task.id)];
    delete globalThis.__xt_timer_cancelled[String(task.id)];
    if (!cancelled) {
      task.cb();
    }
    runs++;
  }
  return runs;
};
"#;

const FLUSH_TIMERS: &[u8] = b"__xt_flush_timers(128);";

/// Runtime hardening knobs shared by the expression environment and the script runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsRuntimeConfig {
    /// Scripts larger than this are skipped.
    pub max_script_bytes: usize,
    pub max_error_messages: usize,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    pub loop_iteration_limit: u64,
}

impl Default for JsRuntimeConfig {
    fn default() -> Self {
        Self {
            max_script_bytes: 2 * 1024 * 1024,
            max_error_messages: 24,
            recursion_limit: 64,
            stack_size_limit: 1024,
            loop_iteration_limit: 100_000,
        }
    }
}

fn new_context(config: &JsRuntimeConfig) -> Result<Context, String> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_recursion_limit(config.recursion_limit);
    context
        .runtime_limits_mut()
        .set_stack_size_limit(config.stack_size_limit);
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(config.loop_iteration_limit);
    context
        .eval(Source::from_bytes(BOOTSTRAP_ENV.as_bytes()))
        .map_err(|error| error.to_string())?;
    Ok(context)
}

/// Evaluates one parameter expression at request time.
///
/// `Ok(None)` means the expression produced no value (`null`, `undefined`
/// or a function) and the parameter should be left out of the request.
pub trait ExpressionEvaluator {
    fn evaluate(&mut self, expression: &str) -> TileResult<Option<String>>;
}

/// Produces an evaluator for one request's parameter pass.
///
/// Failing to open aborts the whole evaluated-parameter group.
pub trait ExpressionEnvironment {
    type Evaluator: ExpressionEvaluator;

    fn open(&self) -> TileResult<Self::Evaluator>;
}

/// boa-backed expression environment with an optional prelude script.
#[derive(Debug, Clone, Default)]
pub struct JsExpressionEnvironment {
    config: JsRuntimeConfig,
    prelude: Option<String>,
}

impl JsExpressionEnvironment {
    pub fn new(config: JsRuntimeConfig) -> Self {
        Self {
            config,
            prelude: None,
        }
    }

    /// Source evaluated once per pass before any expression, e.g. to define helpers.
    pub fn with_prelude(mut self, prelude: impl Into<String>) -> Self {
        self.prelude = Some(prelude.into());
        self
    }
}

impl ExpressionEnvironment for JsExpressionEnvironment {
    type Evaluator = JsExpressionEvaluator;

    fn open(&self) -> TileResult<JsExpressionEvaluator> {
        let mut context = new_context(&self.config).map_err(|message| {
            TileError::new(
                ErrorKind::ExpressionEvaluation,
                "js.expression.bootstrap_failed",
                message,
            )
        })?;

        if let Some(prelude) = &self.prelude {
            context
                .eval(Source::from_bytes(prelude.as_bytes()))
                .map_err(|error| {
                    TileError::new(
                        ErrorKind::ExpressionEvaluation,
                        "js.expression.prelude_failed",
                        error.to_string(),
                    )
                })?;
        }

        Ok(JsExpressionEvaluator { context })
    }
}

pub struct JsExpressionEvaluator {
    context: Context,
}

impl fmt::Debug for JsExpressionEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsExpressionEvaluator").finish_non_exhaustive()
    }
}

impl ExpressionEvaluator for JsExpressionEvaluator {
    fn evaluate(&mut self, expression: &str) -> TileResult<Option<String>> {
        let value = self
            .context
            .eval(Source::from_bytes(expression.as_bytes()))
            .map_err(|error| {
                TileError::new(
                    ErrorKind::ExpressionEvaluation,
                    "js.expression.evaluation_failed",
                    format!("`{expression}`: {error}"),
                )
            })?;

        if value.is_null_or_undefined() || value.is_callable() {
            return Ok(None);
        }

        let text = value.to_string(&mut self.context).map_err(|error| {
            TileError::new(
                ErrorKind::ExpressionEvaluation,
                "js.expression.not_stringifiable",
                format!("`{expression}`: {error}"),
            )
        })?;
        Ok(Some(text.to_std_string_escaped()))
    }
}

/// Script payload to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub origin: String,
    pub source: String,
}

impl ScriptSource {
    pub fn new(origin: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            source: source.into(),
        }
    }
}

/// Accepts script text for execution after the current import completes.
pub trait ScriptScheduler {
    fn schedule(&mut self, script: ScriptSource);
}

/// FIFO of scheduled scripts, drained by [`JsRuntime::run_deferred`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredScriptQueue {
    pending: VecDeque<ScriptSource>,
}

impl DeferredScriptQueue {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &ScriptSource> {
        self.pending.iter()
    }

    pub fn drain(&mut self) -> Vec<ScriptSource> {
        self.pending.drain(..).collect()
    }
}

impl ScriptScheduler for DeferredScriptQueue {
    fn schedule(&mut self, script: ScriptSource) {
        self.pending.push_back(script);
    }
}

/// Per-script execution error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub origin: String,
    pub message: String,
}

/// Runtime outcome summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsExecutionReport {
    pub scripts_seen: usize,
    pub scripts_executed: usize,
    pub scripts_failed: usize,
    pub scripts_skipped: usize,
    pub errors: Vec<ScriptError>,
}

/// Script engine facade. Scripts of one batch share a global scope.
#[derive(Debug, Clone, Default)]
pub struct JsRuntime {
    config: JsRuntimeConfig,
}

impl JsRuntime {
    pub fn new(config: JsRuntimeConfig) -> Self {
        Self { config }
    }

    /// Runs everything scheduled so far, in order. Failures are recorded, never raised.
    pub fn run_deferred(&self, queue: &mut DeferredScriptQueue) -> JsExecutionReport {
        let scripts = queue.drain();
        self.execute_scripts(&scripts)
    }

    pub fn execute_scripts(&self, scripts: &[ScriptSource]) -> JsExecutionReport {
        let mut report = JsExecutionReport {
            scripts_seen: scripts.len(),
            ..JsExecutionReport::default()
        };
        if scripts.is_empty() {
            return report;
        }

        let mut context = match new_context(&self.config) {
            Ok(context) => context,
            Err(message) => {
                warn!(%message, "script runtime bootstrap failed");
                report.scripts_failed = 1;
                report.scripts_skipped = scripts.len();
                report.errors.push(ScriptError {
                    origin: "bootstrap".to_owned(),
                    message,
                });
                return report;
            }
        };

        for script in scripts {
            if script.source.len() > self.config.max_script_bytes {
                debug!(origin = %script.origin, bytes = script.source.len(), "skipping oversized script");
                report.scripts_skipped = report.scripts_skipped.saturating_add(1);
                continue;
            }

            match context.eval(Source::from_bytes(script.source.as_bytes())) {
                Ok(_) => {
                    report.scripts_executed = report.scripts_executed.saturating_add(1);
                    let _ = context.eval(Source::from_bytes(FLUSH_TIMERS));
                }
                Err(error) => {
                    warn!(origin = %script.origin, %error, "scheduled script failed");
                    report.scripts_failed = report.scripts_failed.saturating_add(1);
                    if report.errors.len() < self.config.max_error_messages {
                        report.errors.push(ScriptError {
                            origin: script.origin.clone(),
                            message: error.to_string(),
                        });
                    }
                }
            }
        }

        debug!(
            executed = report.scripts_executed,
            failed = report.scripts_failed,
            skipped = report.scripts_skipped,
            "deferred scripts finished"
        );
        report
    }
}
