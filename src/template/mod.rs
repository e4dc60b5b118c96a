//! # Template Engine
//!
//! Projects an order body into a job payload. A read mapping (output key to
//! JSONPath expression) is compiled once into a [`PreparedMapping`] and then
//! evaluated against any number of documents.
//!
//! Both steps are all-or-nothing: one bad expression fails the whole compile, and
//! one expression that selects nothing fails the whole evaluation.
//!
//! Singular paths (`$.a.b`, `$['a'][0]`) produce the selected value itself. Paths
//! that can select several nodes (wildcards, descendants, slices, filters,
//! unions) produce an array of every match.
//!
//! ## Placeholders
//!
//! A template `{#N: <path>}` builds an object instead of an array. Each `[#N]`
//! selector in the path matches every member or element like `[*]`, and the
//! member name (or index) it matched becomes the output key. `#` alone is `#0`.
//!
//! ```text
//! {#0: $.items[#0].sku}   on {"items": [{"sku": "A"}, {"sku": "B"}]}
//!                         =>  {"0": "A", "1": "B"}
//! ```

use crate::error::{OrderflowError, Result};
use crate::models::ReadMapping;
use serde_json::{Map, Value};
use serde_json_path::{JsonPath, PathElement};
use std::collections::BTreeMap;

/// A read mapping whose expressions have already been parsed
#[derive(Debug, Clone)]
pub struct PreparedMapping {
    expressions: Vec<PreparedExpression>,
}

#[derive(Debug, Clone)]
struct PreparedExpression {
    key: String,
    expression: String,
    selector: Selector,
}

#[derive(Debug, Clone)]
enum Selector {
    Path { path: JsonPath, singular: bool },
    /// `key_segment` is the position of the keying placeholder among the path's segments
    Placeholder { path: JsonPath, key_segment: usize },
}

impl PreparedMapping {
    /// Parse every expression of `body`
    pub fn compile(body: &BTreeMap<String, String>) -> Result<Self> {
        let expressions = body
            .iter()
            .map(|(key, expression)| {
                let selector = Selector::parse(expression).map_err(|reason| {
                    OrderflowError::InvalidExpression {
                        key: key.clone(),
                        expression: expression.clone(),
                        reason,
                    }
                })?;
                Ok(PreparedExpression {
                    key: key.clone(),
                    expression: expression.clone(),
                    selector,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { expressions })
    }

    pub fn from_read_mapping(mapping: &ReadMapping) -> Result<Self> {
        Self::compile(&mapping.body)
    }

    /// Apply every expression to `document`, producing a flat object keyed like the mapping
    pub fn evaluate(&self, document: &Value) -> Result<Value> {
        let mut projection = Map::with_capacity(self.expressions.len());

        for prepared in &self.expressions {
            let value = prepared
                .selector
                .select(document)
                .map_err(|reason| OrderflowError::EvaluationError {
                    key: prepared.key.clone(),
                    expression: prepared.expression.clone(),
                    reason,
                })?;
            projection.insert(prepared.key.clone(), value);
        }

        Ok(Value::Object(projection))
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

impl Selector {
    fn parse(expression: &str) -> std::result::Result<Self, String> {
        if expression.trim_start().starts_with('{') {
            let (path, key_segment) = parse_template(expression)?;
            let path = JsonPath::parse(&path).map_err(|e| e.to_string())?;
            return Ok(Selector::Placeholder { path, key_segment });
        }

        let path = JsonPath::parse(expression).map_err(|e| e.to_string())?;
        Ok(Selector::Path {
            path,
            singular: is_singular(expression),
        })
    }

    fn select(&self, document: &Value) -> std::result::Result<Value, String> {
        match self {
            Selector::Path { path, singular } => {
                let nodes = path.query(document);
                if nodes.is_empty() {
                    return Err("path selected no value".to_string());
                }
                if *singular {
                    nodes
                        .exactly_one()
                        .map(Value::clone)
                        .map_err(|e| e.to_string())
                } else {
                    Ok(Value::Array(nodes.all().into_iter().cloned().collect()))
                }
            }
            Selector::Placeholder { path, key_segment } => {
                let nodes = path.query_located(document);
                if nodes.is_empty() {
                    return Err("path selected no value".to_string());
                }

                let mut object = Map::new();
                for located in nodes.iter() {
                    let key = match located.location().iter().nth(*key_segment) {
                        Some(PathElement::Name(name)) => name.to_string(),
                        Some(PathElement::Index(index)) => index.to_string(),
                        None => return Err("placeholder matched no member".to_string()),
                    };
                    object.insert(key, located.node().clone());
                }
                Ok(Value::Object(object))
            }
        }
    }
}

/// Split `{#N: <path>}` into a plain JSONPath (placeholders turned into
/// wildcards) and the segment position of placeholder `N`.
fn parse_template(expression: &str) -> std::result::Result<(String, usize), String> {
    let inner = expression
        .trim()
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or("placeholder template must be wrapped in '{' and '}'")?;
    let (key, path) = inner
        .split_once(':')
        .ok_or("placeholder template must read '{#N: <path>}'")?;
    let key = key.trim();
    let key_number =
        placeholder_number(key).ok_or_else(|| format!("'{key}' is not a placeholder"))?;

    let (path, placeholders) = rewrite_placeholders(path.trim())?;
    let key_segment = placeholders
        .iter()
        .find(|(number, _)| *number == key_number)
        .map(|(_, segment)| *segment)
        .ok_or_else(|| format!("placeholder #{key_number} does not appear in the path"))?;

    Ok((path, key_segment))
}

/// `#` is `#0`; `#N` is `N`
fn placeholder_number(text: &str) -> Option<usize> {
    let digits = text.strip_prefix('#')?;
    if digits.is_empty() {
        Some(0)
    } else {
        digits.parse().ok()
    }
}

/// Replace every `[#N]` selector with `[*]`, recording `(N, segment position)`.
///
/// Positions only line up with the normalized paths of matches when every
/// segment selects direct children, so descendant segments are refused.
fn rewrite_placeholders(path: &str) -> std::result::Result<(String, Vec<(usize, usize)>), String> {
    let rest = path.strip_prefix('$').ok_or("path must start with '$'")?;
    let mut rewritten = String::from("$");
    let mut placeholders = Vec::new();
    let mut chars = rest.chars().peekable();
    let mut segment = 0;

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if chars.peek() == Some(&'.') {
                    return Err("descendant segments cannot be combined with placeholders".into());
                }
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                if name.is_empty() {
                    return Err("empty member name".into());
                }
                rewritten.push('.');
                rewritten.push_str(&name);
            }
            '[' => {
                let mut selector = String::new();
                let mut quote: Option<char> = None;
                let mut escaped = false;
                let mut closed = false;
                for next in chars.by_ref() {
                    match quote {
                        Some(_) if escaped => escaped = false,
                        Some(_) if next == '\\' => escaped = true,
                        Some(open) if next == open => quote = None,
                        Some(_) => {}
                        None if next == '\'' || next == '"' => quote = Some(next),
                        None if next == ']' => {
                            closed = true;
                            break;
                        }
                        None => {}
                    }
                    selector.push(next);
                }
                if !closed {
                    return Err("unclosed '['".into());
                }
                match placeholder_number(selector.trim()) {
                    Some(number) => {
                        placeholders.push((number, segment));
                        rewritten.push_str("[*]");
                    }
                    None => {
                        rewritten.push('[');
                        rewritten.push_str(&selector);
                        rewritten.push(']');
                    }
                }
            }
            other => return Err(format!("unexpected '{other}' in placeholder path")),
        }
        segment += 1;
    }

    if placeholders.is_empty() {
        return Err("placeholder template path has no '[#N]' selector".into());
    }
    Ok((rewritten, placeholders))
}

/// True when the path can only ever select a single node
fn is_singular(expression: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut previous = '\0';

    for ch in expression.chars() {
        match quote {
            Some(open) => {
                if ch == open && previous != '\\' {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '*' | '?' | ':' | ',' => return false,
                '.' if previous == '.' => return false,
                _ => {}
            },
        }
        previous = if previous == '\\' { '\0' } else { ch };
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn mapping(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, expression)| (key.to_string(), expression.to_string()))
            .collect()
    }

    #[test]
    fn test_simple_projection() {
        let prepared = PreparedMapping::compile(&mapping(&[("x", "$.id")])).unwrap();
        let output = prepared.evaluate(&json!({"id": "42"})).unwrap();
        assert_eq!(output, json!({"x": "42"}));
    }

    #[test]
    fn test_missing_path_is_an_evaluation_error() {
        let prepared = PreparedMapping::compile(&mapping(&[("x", "$.id")])).unwrap();
        let error = prepared.evaluate(&json!({})).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::EvaluationError);
        let message = error.to_string();
        assert!(message.contains("'x'"));
        assert!(message.contains("$.id"));
    }

    #[test]
    fn test_invalid_expression_fails_whole_compile() {
        let error =
            PreparedMapping::compile(&mapping(&[("good", "$.id"), ("bad", "$.[")])).unwrap_err();

        match error {
            OrderflowError::InvalidExpression { key, expression, .. } => {
                assert_eq!(key, "bad");
                assert_eq!(expression, "$.[");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_one_failing_key_fails_whole_evaluation() {
        let prepared =
            PreparedMapping::compile(&mapping(&[("present", "$.a"), ("absent", "$.b")])).unwrap();
        let error = prepared.evaluate(&json!({"a": 1})).unwrap_err();
        assert!(error.to_string().contains("absent"));
    }

    #[test]
    fn test_structures_and_nested_access() {
        let prepared = PreparedMapping::compile(&mapping(&[
            ("customer", "$.customer"),
            ("city", "$.customer.address.city"),
            ("first_item", "$.items[0].sku"),
            ("quoted", "$['customer']['name']"),
        ]))
        .unwrap();

        let document = json!({
            "customer": {"name": "Ada", "address": {"city": "London"}},
            "items": [{"sku": "A-1"}, {"sku": "B-2"}]
        });
        let output = prepared.evaluate(&document).unwrap();

        assert_eq!(output["customer"]["name"], "Ada");
        assert_eq!(output["city"], "London");
        assert_eq!(output["first_item"], "A-1");
        assert_eq!(output["quoted"], "Ada");
    }

    #[test]
    fn test_multi_node_paths_collect_all_matches() {
        let prepared = PreparedMapping::compile(&mapping(&[
            ("skus", "$.items[*].sku"),
            ("prices", "$..price"),
        ]))
        .unwrap();

        let document = json!({
            "items": [{"sku": "A-1", "price": 3}, {"sku": "B-2", "price": 5}]
        });
        let output = prepared.evaluate(&document).unwrap();

        assert_eq!(output["skus"], json!(["A-1", "B-2"]));
        assert_eq!(output["prices"], json!([3, 5]));
    }

    #[test]
    fn test_evaluation_is_repeatable() {
        let prepared =
            PreparedMapping::compile(&mapping(&[("x", "$.id"), ("y", "$.nested.v")])).unwrap();
        let document = json!({"id": "42", "nested": {"v": [1, 2]}});

        let first = prepared.evaluate(&document).unwrap();
        let second = prepared.evaluate(&document).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_mapping_projects_empty_object() {
        let prepared = PreparedMapping::compile(&BTreeMap::new()).unwrap();
        assert!(prepared.is_empty());
        assert_eq!(prepared.evaluate(&json!({"a": 1})).unwrap(), json!({}));
    }

    #[test]
    fn test_placeholder_keys_by_index() {
        let prepared =
            PreparedMapping::compile(&mapping(&[("skus", "{#0: $.items[#0].sku}")])).unwrap();
        let output = prepared
            .evaluate(&json!({"items": [{"sku": "A-1"}, {"sku": "B-2"}]}))
            .unwrap();
        assert_eq!(output, json!({"skus": {"0": "A-1", "1": "B-2"}}));
    }

    #[test]
    fn test_placeholder_keys_by_member_name() {
        let prepared = PreparedMapping::compile(&mapping(&[
            ("stock", "{#: $.warehouses[#].stock}"),
            ("managers", "{#1: $.regions[#0].stores[#1].manager}"),
        ]))
        .unwrap();

        let document = json!({
            "warehouses": {"north": {"stock": 3}, "south": {"stock": 5}},
            "regions": [
                {"stores": {"soho": {"manager": "Ada"}}},
                {"stores": {"leith": {"manager": "Grace"}}}
            ]
        });
        let output = prepared.evaluate(&document).unwrap();

        assert_eq!(output["stock"], json!({"north": 3, "south": 5}));
        assert_eq!(output["managers"], json!({"soho": "Ada", "leith": "Grace"}));
    }

    #[test]
    fn test_placeholder_with_quoted_members() {
        let prepared =
            PreparedMapping::compile(&mapping(&[("v", "{#0: $['odd]key'][#0]}")])).unwrap();
        let output = prepared.evaluate(&json!({"odd]key": {"a": 1}})).unwrap();
        assert_eq!(output, json!({"v": {"a": 1}}));
    }

    #[test]
    fn test_invalid_placeholder_templates_are_rejected() {
        for expression in [
            "{#2: $.items[#0].sku}",
            "{#x: $.items[#0].sku}",
            "{#0: $..items[#0]}",
            "{#0: $.items[*].sku}",
            "{#0: $.items[#0].sku",
            "{#0 $.items[#0]}",
            "{#0: $.items[#0}",
            "{#0: items[#0]}",
        ] {
            let error = PreparedMapping::compile(&mapping(&[("bad", expression)])).unwrap_err();
            assert_eq!(
                error.kind(),
                ErrorKind::InvalidExpression,
                "{expression} should not compile"
            );
        }
    }

    #[test]
    fn test_placeholder_over_empty_collection_is_an_evaluation_error() {
        let prepared =
            PreparedMapping::compile(&mapping(&[("skus", "{#0: $.items[#0].sku}")])).unwrap();
        let error = prepared.evaluate(&json!({"items": []})).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::EvaluationError);
    }

    #[test]
    fn test_singular_detection() {
        assert!(is_singular("$"));
        assert!(is_singular("$.a.b"));
        assert!(is_singular("$['a.b']['c']"));
        assert!(is_singular("$['odd,*key']"));
        assert!(is_singular("$.items[0]"));
        assert!(!is_singular("$.items[*]"));
        assert!(!is_singular("$..a"));
        assert!(!is_singular("$.items[0:2]"));
        assert!(!is_singular("$.items[0,1]"));
        assert!(!is_singular("$.items[?@.sku]"));
    }
}
