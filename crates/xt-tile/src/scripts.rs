//! Scripts embedded in imported content.

use tracing::debug;
use xt_dom::Element;
use xt_dom::Node;
use xt_js::ScriptScheduler;
use xt_js::ScriptSource;

use crate::import::ContentMode;

/// Content modes whose inserted scripts do not run on their own and must be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptExecutionPolicy {
    pub xhtml: bool,
    pub html: bool,
}

impl Default for ScriptExecutionPolicy {
    fn default() -> Self {
        Self {
            xhtml: false,
            html: true,
        }
    }
}

impl ScriptExecutionPolicy {
    pub fn requires_manual_execution(&self, mode: ContentMode) -> bool {
        match mode {
            ContentMode::Xhtml => self.xhtml,
            ContentMode::Html => self.html,
        }
    }
}

/// Concatenated text and CDATA children of a script element.
pub fn script_text(script: &Element) -> String {
    script
        .children
        .iter()
        .filter_map(|child| match child {
            Node::Text(value) | Node::CData(value) => Some(value.as_str()),
            _ => None,
        })
        .collect()
}

/// Script elements under `nodes`, in document order.
pub fn collect_scripts(nodes: &[Node]) -> Vec<&Element> {
    let mut scripts = Vec::new();
    for node in nodes {
        if let Node::Element(element) = node {
            collect_from(element, &mut scripts);
        }
    }
    scripts
}

fn collect_from<'a>(element: &'a Element, scripts: &mut Vec<&'a Element>) {
    if element.local_name().eq_ignore_ascii_case("script") {
        scripts.push(element);
    }
    for child in element.child_elements() {
        collect_from(child, scripts);
    }
}

/// Schedules every embedded script when `mode` needs manual execution. Returns how many were scheduled.
pub fn execute_embedded_scripts<S>(
    nodes: &[Node],
    mode: ContentMode,
    policy: ScriptExecutionPolicy,
    scheduler: &mut S,
    origin: &str,
) -> usize
where
    S: ScriptScheduler + ?Sized,
{
    if !policy.requires_manual_execution(mode) {
        return 0;
    }

    let scripts = collect_scripts(nodes);
    for (index, script) in scripts.iter().enumerate() {
        scheduler.schedule(ScriptSource::new(
            format!("{origin}#script{index}"),
            script_text(script),
        ));
    }
    if !scripts.is_empty() {
        debug!(origin, count = scripts.len(), "scheduled embedded scripts");
    }
    scripts.len()
}
