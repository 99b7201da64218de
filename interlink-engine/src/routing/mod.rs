//! Content-based routing: condition language and rule evaluation.
//!
//! Conditions reference HL7 fields as `{MSH-9.1}` atoms and combine
//! comparisons, membership tests, and string functions with `AND`/`OR`/
//! `NOT` and parentheses. Each rule's condition is tokenised and parsed
//! once into an AST which is cached; evaluation is a lookup over the parsed
//! view, not string templating.
//!
//! Evaluation precedence: parentheses, then `NOT`, then comparisons and
//! functions, then `AND`, then `OR` (lowest).

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod rule;

pub use eval::ConditionEvaluator;
pub use rule::{RoutingResult, RoutingRule, RuleAction, RuleSet, ValidationMode};
