//! Directive scripts: syntax, parameters and the parsed operation list.

pub mod errors;
pub mod operation;
pub mod params;
pub mod parser;

pub use errors::{ParseError, ParseErrors};
pub use operation::{Directive, Operation, OperationKind, Script};
pub use params::{FindParams, ParamError, ReplaceParams, RunParams, TreeParams};
pub use parser::{parse, Parser, TAG};
