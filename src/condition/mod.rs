//! This module implements the condition language that gates metadata.
//! Conditions are small boolean expressions over the game's data directory,
//! like `file("Blank.esm") and not active("Blank.esp")`.

pub mod eval;
pub mod parser;

pub use eval::{ConditionEvaluator, SELF_SENTINEL};
pub use parser::parse_condition;
