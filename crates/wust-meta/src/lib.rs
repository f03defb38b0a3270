mod engine;
mod error;
mod meta;
mod parse;
mod resolve;
mod stream;

pub use engine::Engine;
pub use error::MalformedControlFlow;
pub use meta::{
    Address, BeginBlockMeta, BeginLoopMeta, BrMeta, ElseMeta, IfMeta, Meta, MetaId,
    MetaInstruction, MetaKind, ReturnMeta,
};
pub use parse::{FuncIdx, FunctionMarkers, parse_module, resolve_module};
pub use stream::MarkerStream;
