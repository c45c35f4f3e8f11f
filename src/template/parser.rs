//! Parser for the `{{...}}` expression mini-language.
//!
//! An expression is either a dotted path (`a.b.c`, each segment allowing a
//! single trailing index like `items[0]`) or a zero-argument builtin call
//! (`now()`), followed by an optional pipe chain (`|upper|trim`). Parsing
//! happens once per template occurrence; resolution walks the produced AST
//! instead of re-scanning strings.

/// One dotted-path segment with an optional trailing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub key: String,
    pub index: Option<usize>,
}

/// Expression head: a context path or a builtin function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Path(Vec<PathSegment>),
    Call(String),
}

/// A parsed template expression: head plus pipe-transform names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateExpr {
    pub expr: Expr,
    pub pipes: Vec<String>,
}

impl TemplateExpr {
    /// The bare variable path this expression reads, pipes and indexes
    /// stripped. `None` for function calls.
    pub fn variable_path(&self) -> Option<String> {
        match &self.expr {
            Expr::Call(_) => None,
            Expr::Path(segments) => Some(
                segments
                    .iter()
                    .map(|s| s.key.as_str())
                    .collect::<Vec<_>>()
                    .join("."),
            ),
        }
    }
}

/// Parse the inside of a `{{...}}` occurrence. Returns `None` for
/// malformed expressions, which resolve as "no value".
pub fn parse_expr(raw: &str) -> Option<TemplateExpr> {
    let mut parts = raw.split('|').map(str::trim);
    let head = parts.next()?;
    if head.is_empty() {
        return None;
    }
    let mut pipes = Vec::new();
    for pipe in parts {
        if pipe.is_empty() || !is_identifier(pipe) {
            return None;
        }
        pipes.push(pipe.to_string());
    }

    let expr = if let Some(name) = head.strip_suffix("()") {
        if !is_identifier(name) {
            return None;
        }
        Expr::Call(name.to_string())
    } else {
        let mut segments = Vec::new();
        for part in head.split('.') {
            segments.push(parse_segment(part)?);
        }
        Expr::Path(segments)
    };

    Some(TemplateExpr { expr, pipes })
}

fn parse_segment(part: &str) -> Option<PathSegment> {
    let part = part.trim();
    if let Some(open) = part.find('[') {
        let close = part.strip_suffix(']')?;
        let key = &part[..open];
        let index: usize = close[open + 1..].parse().ok()?;
        if key.is_empty() {
            return None;
        }
        Some(PathSegment {
            key: key.to_string(),
            index: Some(index),
        })
    } else if part.is_empty() {
        None
    } else {
        Some(PathSegment {
            key: part.to_string(),
            index: None,
        })
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let expr = parse_expr("input.amount").unwrap();
        assert_eq!(
            expr.expr,
            Expr::Path(vec![
                PathSegment { key: "input".into(), index: None },
                PathSegment { key: "amount".into(), index: None },
            ])
        );
        assert!(expr.pipes.is_empty());
        assert_eq!(expr.variable_path().unwrap(), "input.amount");
    }

    #[test]
    fn test_parse_indexed_segment() {
        let expr = parse_expr("items[0].name").unwrap();
        match &expr.expr {
            Expr::Path(segments) => {
                assert_eq!(segments[0].key, "items");
                assert_eq!(segments[0].index, Some(0));
                assert_eq!(segments[1].key, "name");
            }
            other => panic!("expected path, got {:?}", other),
        }
        assert_eq!(expr.variable_path().unwrap(), "items.name");
    }

    #[test]
    fn test_parse_call() {
        let expr = parse_expr("now()").unwrap();
        assert_eq!(expr.expr, Expr::Call("now".into()));
        assert!(expr.variable_path().is_none());
    }

    #[test]
    fn test_parse_pipes() {
        let expr = parse_expr("user.name | upper | trim").unwrap();
        assert_eq!(expr.pipes, vec!["upper".to_string(), "trim".to_string()]);
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(parse_expr("").is_none());
        assert!(parse_expr("a..b").is_none());
        assert!(parse_expr("items[x]").is_none());
        assert!(parse_expr("items[1").is_none());
        assert!(parse_expr("[0]").is_none());
        assert!(parse_expr("a |").is_none());
        assert!(parse_expr("my func()").is_none());
    }
}
