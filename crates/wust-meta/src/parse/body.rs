use anyhow::anyhow;
use wasmparser::{BlockType, FunctionBody, Operator, types::TypesRef};

use super::effects::stack_effect;
use crate::meta::MetaInstruction;
use crate::stream::MarkerStream;

#[cfg(test)]
mod tests;

/// Values a block consumes on entry and leaves on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Arity {
    params: u32,
    results: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Block,
    Loop,
    If,
}

impl BlockKind {
    fn marker(self, offset: usize) -> MetaInstruction<usize> {
        match self {
            BlockKind::Block => MetaInstruction::begin_block(offset),
            BlockKind::Loop => MetaInstruction::begin_loop(offset),
            BlockKind::If => MetaInstruction::if_(offset),
        }
    }
}

/// An open block/loop/if (or the implicit function block) while
/// collecting.
#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: BlockKind,
    /// Value depth below the block's params.
    height: u32,
    arity: Arity,
    /// Set after `br`, `br_table`, `return` or `unreachable`: the rest of
    /// the frame sees a polymorphic stack.
    unreachable: bool,
}

/// Turns one function body into a marker stream.
///
/// Tracks its own value depth so that dead code after an unconditional
/// transfer still produces a balanced stream.
struct BodyCollector<'a> {
    types: TypesRef<'a>,
    stream: MarkerStream<usize>,
    frames: Vec<Frame>,
    depth: u32,
    /// Result count of the function itself.
    results: u32,
}

/// Collect the markers of the body of function `func_idx`.
///
/// The body is wrapped in an implicit block starting at its first
/// operator; the body's final `end` closes it.
pub(crate) fn collect_body(
    body: &FunctionBody,
    types: TypesRef,
    func_idx: u32,
) -> Result<MarkerStream<usize>, anyhow::Error> {
    let arity = func_arity(types, func_idx);
    let reader = body.get_operators_reader()?;
    let start = reader.original_position();

    let mut collector = BodyCollector {
        types,
        stream: MarkerStream::new(),
        frames: Vec::new(),
        depth: 0,
        results: arity.results,
    };
    collector.open(
        start,
        BlockKind::Block,
        Arity {
            params: 0,
            results: arity.results,
        },
    );

    for item in reader.into_iter_with_offsets() {
        let (op, offset) = item?;
        collector.operator(op, offset)?;
    }
    Ok(collector.stream)
}

fn func_arity(types: TypesRef, func_idx: u32) -> Arity {
    let func_type = types[types.core_function_at(func_idx)].unwrap_func();
    Arity {
        params: func_type.params().len() as u32,
        results: func_type.results().len() as u32,
    }
}

fn type_arity(types: TypesRef, type_idx: u32) -> Arity {
    let func_type = types[types.core_type_at_in_module(type_idx)].unwrap_func();
    Arity {
        params: func_type.params().len() as u32,
        results: func_type.results().len() as u32,
    }
}

impl BodyCollector<'_> {
    fn operator(&mut self, op: Operator, offset: usize) -> Result<(), anyhow::Error> {
        match op {
            // Structured control
            Operator::Block { blockty } => {
                let arity = self.block_arity(blockty);
                self.open(offset, BlockKind::Block, arity);
            }
            Operator::Loop { blockty } => {
                let arity = self.block_arity(blockty);
                self.open(offset, BlockKind::Loop, arity);
            }
            Operator::If { blockty } => {
                let arity = self.block_arity(blockty);
                self.pop(offset, 1);
                self.open(offset, BlockKind::If, arity);
            }
            Operator::Else => self.else_(offset)?,
            Operator::End => self.end(offset)?,

            // Branches
            Operator::Br { relative_depth } => {
                self.branch(offset, relative_depth)?;
                self.set_unreachable();
            }
            Operator::BrIf { relative_depth } => {
                self.pop(offset, 1);
                self.branch(offset, relative_depth)?;
            }
            Operator::BrTable { targets } => {
                self.pop(offset, 1);
                for target in targets.targets() {
                    self.branch(offset, target?)?;
                }
                self.branch(offset, targets.default())?;
                self.set_unreachable();
            }
            Operator::Return => {
                // `return` unwinds everything below the returned values.
                self.materialize(offset, self.results);
                let excess = self.depth.saturating_sub(self.results);
                self.pop(offset, excess);
                self.stream.collect(MetaInstruction::return_(offset));
                self.depth = self.depth.saturating_sub(self.results);
                self.set_unreachable();
            }
            Operator::Unreachable => self.set_unreachable(),

            // Calls
            Operator::Call { function_index } => {
                let arity = func_arity(self.types, function_index);
                self.pop(offset, arity.params);
                self.push(offset, arity.results);
            }
            Operator::CallIndirect { type_index, .. } => {
                let arity = type_arity(self.types, type_index);
                self.pop(offset, arity.params + 1);
                self.push(offset, arity.results);
            }

            other => {
                let effect = stack_effect(&other).ok_or_else(|| {
                    anyhow!("unsupported operator {other:?} at offset {offset:#x}")
                })?;
                self.pop(offset, effect.pops);
                self.push(offset, effect.pushes);
            }
        }
        Ok(())
    }

    fn block_arity(&self, blockty: BlockType) -> Arity {
        match blockty {
            BlockType::Empty => Arity {
                params: 0,
                results: 0,
            },
            BlockType::Type(_) => Arity {
                params: 0,
                results: 1,
            },
            BlockType::FuncType(type_idx) => type_arity(self.types, type_idx),
        }
    }

    fn open(&mut self, offset: usize, kind: BlockKind, arity: Arity) {
        self.materialize(offset, arity.params);
        self.stream.collect(kind.marker(offset));
        self.frames.push(Frame {
            kind,
            height: self.depth.saturating_sub(arity.params),
            arity,
            unreachable: false,
        });
    }

    /// Emit a branch to the label `relative_depth` frames out.
    ///
    /// The label's values must be on the stack when the branch is taken,
    /// so dead code gets placeholders for them first.
    fn branch(&mut self, offset: usize, relative_depth: u32) -> Result<(), anyhow::Error> {
        let label = self
            .frames
            .len()
            .checked_sub(relative_depth as usize + 1)
            .map(|idx| self.frames[idx])
            .ok_or_else(|| {
                anyhow!("branch to missing label {relative_depth} at offset {offset:#x}")
            })?;
        // A loop label carries its params back to the start.
        let values = match label.kind {
            BlockKind::Loop => label.arity.params,
            BlockKind::Block | BlockKind::If => label.arity.results,
        };
        self.materialize(offset, values);
        self.stream.collect(MetaInstruction::br(offset, relative_depth));
        Ok(())
    }

    fn else_(&mut self, offset: usize) -> Result<(), anyhow::Error> {
        let frame = self.top(offset, "else")?;
        self.rebalance(offset, frame.height + frame.arity.results);
        self.stream.collect(MetaInstruction::else_(offset));
        // The else arm starts over from the block params.
        self.rebalance(offset, frame.height + frame.arity.params);
        if let Some(frame) = self.frames.last_mut() {
            frame.unreachable = false;
        }
        Ok(())
    }

    fn end(&mut self, offset: usize) -> Result<(), anyhow::Error> {
        let frame = self.top(offset, "end")?;
        self.rebalance(offset, frame.height + frame.arity.results);
        self.stream.collect(MetaInstruction::end(offset));
        self.frames.pop();
        Ok(())
    }

    fn top(&self, offset: usize, what: &str) -> Result<Frame, anyhow::Error> {
        self.frames
            .last()
            .copied()
            .ok_or_else(|| anyhow!("{what} without open block at offset {offset:#x}"))
    }

    fn set_unreachable(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.unreachable = true;
        }
    }

    /// Values available to the innermost frame.
    fn available(&self) -> u32 {
        let height = self.frames.last().map_or(0, |frame| frame.height);
        self.depth.saturating_sub(height)
    }

    /// In dead code, push placeholders until `count` values are
    /// available; the polymorphic stack would supply them.
    fn materialize(&mut self, offset: usize, count: u32) {
        let dead = self.frames.last().is_some_and(|frame| frame.unreachable);
        let available = self.available();
        if dead && available < count {
            self.push(offset, count - available);
        }
    }

    fn pop(&mut self, offset: usize, count: u32) {
        let count = match self.frames.last() {
            // Never pop below the frame in dead code.
            Some(frame) if frame.unreachable => count.min(self.available()),
            _ => count,
        };
        for _ in 0..count {
            self.stream.collect(MetaInstruction::pop(offset));
        }
        self.depth = self.depth.saturating_sub(count);
    }

    fn push(&mut self, offset: usize, count: u32) {
        for _ in 0..count {
            self.stream.collect(MetaInstruction::push(offset));
        }
        self.depth += count;
    }

    /// Emit pops or pushes until the depth equals `target`.
    fn rebalance(&mut self, offset: usize, target: u32) {
        if self.depth > target {
            self.pop(offset, self.depth - target);
        } else {
            self.push(offset, target - self.depth);
        }
    }
}
