pub mod engine;
pub mod errors;
pub mod hints;
pub mod whitespace;

pub use engine::{
    apply, apply_rule, check_rule, compile_pattern, find_matches, ReplaceOutcome,
    ReplacementRule, RuleMatch,
};
pub use errors::MatchError;
pub use hints::{similar_snippets, Hint};
