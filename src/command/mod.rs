pub mod errors;
pub mod exec;
pub mod policy;

pub use errors::{CommandError, PolicyError};
pub use exec::{run_command, CommandOutput, CommandRequest};
pub use policy::{
    normalize_command, BlockReason, CommandPolicy, PolicyBuilder, PolicyMode, Verdict,
    DEFAULT_ALLOW_PATTERNS, DEFAULT_BLOCK_PATTERNS, DEFAULT_TIMEOUT, MAX_TIMEOUT,
};
