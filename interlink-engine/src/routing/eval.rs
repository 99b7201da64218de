//! Condition evaluation against a parsed HL7 view.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use super::lexer::{tokenize, CmpOp, StrFunc};
use super::parser::{parse, Expr, Operand};
use crate::error::EngineError;
use crate::hl7::ParsedView;

/// Evaluates routing conditions, caching one parsed AST per condition text.
///
/// Field references resolve through [`ParsedView::get_field`]; unresolved
/// fields evaluate as the empty string. All comparisons and string functions
/// are case-sensitive over the written text.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::hl7::ParsedView;
/// use interlink_engine::routing::ConditionEvaluator;
///
/// let raw = b"MSH|^~\\&|SRC|F1|DST|F2|20240115||ADT^A01|M1|P|2.4\r";
/// let view = ParsedView::new(raw.to_vec());
/// let evaluator = ConditionEvaluator::new();
///
/// let hit = evaluator
///     .evaluate(r#"{MSH-9.1} = "ADT" AND {MSH-9.2} = "A01""#, &view)
///     .unwrap();
/// assert!(hit);
/// ```
#[derive(Default)]
pub struct ConditionEvaluator {
    cache: DashMap<String, Arc<Expr>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `condition` against `view`.
    ///
    /// An empty condition always matches. Malformed conditions fail with
    /// `ValidationFailed`.
    pub fn evaluate(&self, condition: &str, view: &ParsedView) -> Result<bool, EngineError> {
        if condition.trim().is_empty() {
            return Ok(true);
        }

        let expr = match self.cache.get(condition) {
            Some(cached) => Arc::clone(cached.value()),
            None => {
                let tokens = tokenize(condition)?;
                let parsed = Arc::new(parse(&tokens, condition)?);
                self.cache
                    .insert(condition.to_string(), Arc::clone(&parsed));
                parsed
            }
        };

        Ok(eval_expr(&expr, view))
    }

    /// Number of cached condition ASTs.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

fn resolve(operand: &Operand, view: &ParsedView) -> String {
    match operand {
        Operand::Field(path) => view.get_field(path).unwrap_or_default(),
        Operand::Literal(text) => text.clone(),
    }
}

fn eval_expr(expr: &Expr, view: &ParsedView) -> bool {
    match expr {
        Expr::Or(parts) => parts.iter().any(|p| eval_expr(p, view)),
        Expr::And(parts) => parts.iter().all(|p| eval_expr(p, view)),
        Expr::Not(inner) => !eval_expr(inner, view),
        Expr::Cmp { left, op, right } => {
            let a = resolve(left, view);
            let b = resolve(right, view);
            match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
            }
        }
        Expr::Func { left, func, right } => {
            let a = resolve(left, view);
            let b = resolve(right, view);
            match func {
                StrFunc::Contains => a.contains(&b),
                StrFunc::StartsWith => a.starts_with(&b),
                StrFunc::EndsWith => a.ends_with(&b),
            }
        }
        Expr::In { left, items } => {
            let a = resolve(left, view);
            items.iter().any(|item| resolve(item, view) == a)
        }
        Expr::Truthy(operand) => !resolve(operand, view).is_empty(),
    }
}
