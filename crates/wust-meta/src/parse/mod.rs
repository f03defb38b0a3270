pub(crate) mod body;
mod effects;

use anyhow::Context;
use tracing::debug;
use wasmparser::types::Types;
use wasmparser::{FunctionBody, Parser, Payload};

use crate::Engine;
use crate::stream::MarkerStream;
use body::collect_body;

/// Index into the module's function index space (imports included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncIdx(pub u32);

/// Markers collected from one defined function, addressed by byte
/// offset into the module.
#[derive(Debug, Clone)]
pub struct FunctionMarkers {
    pub func_idx: FuncIdx,
    pub stream: MarkerStream<usize>,
}

/// Validate a module and collect the markers of every defined function.
///
/// The streams are returned unresolved.
pub fn parse_module(engine: &Engine, bytes: &[u8]) -> Result<Vec<FunctionMarkers>, anyhow::Error> {
    let mut validator = engine.new_validator();
    let types = validator.validate_all(bytes)?;

    let mut builder = ModuleBuilder::new(types);
    let parser = Parser::new(0);
    for payload in parser.parse_all(bytes) {
        builder.process_payload(payload?)?;
    }
    Ok(builder.build())
}

/// Collect and resolve every defined function of a module.
pub fn resolve_module(engine: &Engine, bytes: &[u8]) -> Result<Vec<FunctionMarkers>, anyhow::Error> {
    let mut funcs = parse_module(engine, bytes)?;
    for func in &mut funcs {
        func.stream
            .resolve()
            .with_context(|| format!("resolving control flow of function {}", func.func_idx.0))?;
    }
    Ok(funcs)
}

struct ModuleBuilder {
    types: Types,
    /// Index of the next code section entry among defined functions.
    next_body: u32,
    num_imported: u32,
    funcs: Vec<FunctionMarkers>,
}

impl ModuleBuilder {
    fn new(types: Types) -> Self {
        Self {
            types,
            next_body: 0,
            num_imported: 0,
            funcs: Vec::new(),
        }
    }

    fn process_payload(&mut self, payload: Payload) -> Result<(), anyhow::Error> {
        match payload {
            Payload::CodeSectionStart { count, .. } => {
                // Defined functions are exactly the ones with a body.
                self.num_imported = self.types.as_ref().function_count() - count;
                Ok(())
            }
            Payload::CodeSectionEntry(body) => self.parse_body(body),
            _ => Ok(()),
        }
    }

    fn parse_body(&mut self, body: FunctionBody) -> Result<(), anyhow::Error> {
        let func_idx = FuncIdx(self.num_imported + self.next_body);
        self.next_body += 1;

        let stream = collect_body(&body, self.types.as_ref(), func_idx.0)
            .with_context(|| format!("collecting markers of function {}", func_idx.0))?;
        debug!(func = func_idx.0, markers = stream.len(), "collected function");
        self.funcs.push(FunctionMarkers { func_idx, stream });
        Ok(())
    }

    fn build(self) -> Vec<FunctionMarkers> {
        self.funcs
    }
}
