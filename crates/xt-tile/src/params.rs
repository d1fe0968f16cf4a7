//! Extra request parameters appended to a layer's tile URL.

use tracing::warn;
use xt_js::ExpressionEnvironment;
use xt_js::ExpressionEvaluator;
use xt_net::append_query;
use xt_net::parameter_string;

use crate::layer::LayerIdentity;

/// `OPENLAYERS_MAP_ID`, `OPENLAYERS_MAP_DIV_ID`, `OPENLAYERS_LAYER_ID` and
/// `OPENLAYERS_TILE_ID`; missing values are sent empty.
pub fn identity_params(identity: &LayerIdentity, tile_id: Option<&str>) -> Vec<(String, String)> {
    [
        ("OPENLAYERS_MAP_ID", identity.map_id.as_deref()),
        ("OPENLAYERS_MAP_DIV_ID", identity.map_container_id.as_deref()),
        ("OPENLAYERS_LAYER_ID", identity.layer_id.as_deref()),
        ("OPENLAYERS_TILE_ID", tile_id),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_owned(), value.unwrap_or_default().to_owned()))
    .collect()
}

/// Evaluates each expression in order.
///
/// A failing expression contributes an empty value; an expression without a
/// value is left out. `None` means no evaluator could be opened and the whole
/// group must be omitted from the request.
pub fn evaluated_params<E>(
    environment: &E,
    expressions: &[(String, String)],
) -> Option<Vec<(String, String)>>
where
    E: ExpressionEnvironment,
{
    if expressions.is_empty() {
        return Some(Vec::new());
    }

    let mut evaluator = match environment.open() {
        Ok(evaluator) => evaluator,
        Err(error) => {
            warn!(%error, "dropping evaluated parameters");
            return None;
        }
    };

    let mut params = Vec::with_capacity(expressions.len());
    for (name, expression) in expressions {
        match evaluator.evaluate(expression) {
            Ok(Some(value)) => params.push((name.clone(), value)),
            Ok(None) => {}
            Err(error) => {
                warn!(param = name.as_str(), %error, "evaluated parameter failed");
                params.push((name.clone(), String::new()));
            }
        }
    }
    Some(params)
}

/// Appends parameter groups to `url`, leaving it untouched when there are none.
pub fn extend_url(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_owned();
    }
    let query = parameter_string(
        params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str())),
    );
    append_query(url, &query)
}

#[cfg(test)]
mod tests {
    use super::evaluated_params;
    use super::extend_url;
    use super::identity_params;
    use crate::layer::LayerIdentity;
    use xt_core::ErrorKind;
    use xt_core::TileError;
    use xt_core::TileResult;
    use xt_js::ExpressionEnvironment;
    use xt_js::ExpressionEvaluator;
    use xt_js::JsExpressionEnvironment;

    struct Unavailable;

    struct NeverEvaluates;

    impl ExpressionEvaluator for NeverEvaluates {
        fn evaluate(&mut self, _expression: &str) -> TileResult<Option<String>> {
            Ok(Some("unreachable".to_owned()))
        }
    }

    impl ExpressionEnvironment for Unavailable {
        type Evaluator = NeverEvaluates;

        fn open(&self) -> TileResult<NeverEvaluates> {
            Err(TileError::new(
                ErrorKind::ExpressionEvaluation,
                "test.unavailable",
                "no evaluator",
            ))
        }
    }

    fn pairs(values: &[(&str, &str)]) -> Vec<(String, String)> {
        values
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn failing_expression_substitutes_empty_value() {
        let environment = JsExpressionEnvironment::default();
        let params = evaluated_params(&environment, &pairs(&[("a", "1+1"), ("b", "throwExpr()")]));
        assert_eq!(params, Some(pairs(&[("a", "2"), ("b", "")])));
        assert_eq!(
            extend_url("http://t.test/x?k=v", &pairs(&[("a", "2"), ("b", "")])),
            "http://t.test/x?k=v&a=2&b="
        );
    }

    #[test]
    fn valueless_expressions_are_omitted() {
        let environment = JsExpressionEnvironment::default();
        let params = evaluated_params(&environment, &pairs(&[("n", "null"), ("s", "'x' + 1")]));
        assert_eq!(params, Some(pairs(&[("s", "x1")])));
    }

    #[test]
    fn unavailable_environment_drops_the_group() {
        assert_eq!(evaluated_params(&Unavailable, &pairs(&[("a", "1")])), None);
        assert_eq!(evaluated_params(&Unavailable, &[]), Some(Vec::new()));
    }

    #[test]
    fn identity_values_default_to_empty() {
        let identity = LayerIdentity {
            map_id: Some("map".to_owned()),
            map_container_id: None,
            layer_id: Some("roads".to_owned()),
        };
        assert_eq!(
            identity_params(&identity, Some("tile-3")),
            pairs(&[
                ("OPENLAYERS_MAP_ID", "map"),
                ("OPENLAYERS_MAP_DIV_ID", ""),
                ("OPENLAYERS_LAYER_ID", "roads"),
                ("OPENLAYERS_TILE_ID", "tile-3"),
            ])
        );
        assert_eq!(extend_url("http://t.test/", &[]), "http://t.test/");
    }
}
