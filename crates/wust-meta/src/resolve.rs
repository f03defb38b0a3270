use tracing::{debug, trace};

use crate::error::MalformedControlFlow;
use crate::meta::{Address, BrMeta, Meta, MetaId, MetaInstruction};


/// An open block, loop or if on the control stack.
#[derive(Debug, Clone, Copy)]
struct OpenConstruct {
    id: MetaId,
    /// Value depth when the construct was entered.
    entry_depth: u32,
}

/// Single forward pass over a marker stream.
///
/// Only lives for one `run`: the control stack and value depth never
/// carry over between functions.
pub(crate) struct Resolver {
    control_stack: Vec<OpenConstruct>,
    value_depth: u32,
    /// Branches leaving a block or if, paired with that construct. Their
    /// target is the construct's `end`, which is only known once the
    /// forward pass is done.
    forward: Vec<(MetaId, MetaId)>,
}

impl Resolver {
    pub(crate) fn new() -> Self {
        Resolver {
            control_stack: Vec::new(),
            value_depth: 0,
            forward: Vec::new(),
        }
    }

    pub(crate) fn run<A: Address>(
        mut self,
        metas: &mut [MetaInstruction<A>],
    ) -> Result<(), MalformedControlFlow<A>> {
        for idx in 0..metas.len() {
            // Every construct on the control stack precedes the current
            // marker, so it lives in `visited`.
            let (visited, rest) = metas.split_at_mut(idx);
            self.step(MetaId(idx), &mut rest[0], visited)?;
        }

        if !self.control_stack.is_empty() {
            return Err(MalformedControlFlow::Unterminated {
                open: self.control_stack.len(),
            });
        }

        self.patch_forward_branches(metas);
        debug!(
            markers = metas.len(),
            forward_branches = self.forward.len(),
            "resolved control flow"
        );
        Ok(())
    }

    fn step<A: Address>(
        &mut self,
        id: MetaId,
        current: &mut MetaInstruction<A>,
        visited: &mut [MetaInstruction<A>],
    ) -> Result<(), MalformedControlFlow<A>> {
        let location = current.location;
        trace!(
            ?location,
            kind = %current.kind(),
            depth = self.value_depth,
            open = self.control_stack.len(),
            "marker"
        );

        match &mut current.meta {
            Meta::Push => self.value_depth += 1,
            Meta::Pop => {
                self.value_depth = self
                    .value_depth
                    .checked_sub(1)
                    .ok_or(MalformedControlFlow::ValueStackUnderflow { location })?;
            }
            Meta::BeginBlock(_) | Meta::If(_) => self.open(id),
            Meta::BeginLoop(lp) => {
                lp.stack_depth_at_start = Some(self.value_depth);
                self.open(id);
            }
            Meta::Else(else_) => {
                let if_id = self
                    .control_stack
                    .last()
                    .map(|open| open.id)
                    .ok_or(MalformedControlFlow::ElseWithoutIf { location })?;
                let Meta::If(if_) = &mut visited[if_id.index()].meta else {
                    return Err(MalformedControlFlow::ElseWithoutIf { location });
                };
                if if_.else_ref.is_some() {
                    return Err(MalformedControlFlow::DuplicateElse { location });
                }
                if_.else_ref = Some(id);
                else_.if_ref = Some(if_id);
            }
            Meta::End => {
                let closed = self
                    .control_stack
                    .pop()
                    .ok_or(MalformedControlFlow::UnmatchedEnd { location })?;
                let opener = &mut visited[closed.id.index()];
                let opener_kind = opener.kind();
                match &mut opener.meta {
                    Meta::BeginBlock(block) => block.end_location = Some(location),
                    Meta::BeginLoop(lp) => lp.end_location = Some(location),
                    Meta::If(if_) => if_.end_location = Some(location),
                    _ => {
                        return Err(MalformedControlFlow::UnexpectedEnd {
                            location,
                            opener: opener_kind,
                        });
                    }
                }
            }
            Meta::Br(br) => self.resolve_branch(id, location, br, visited)?,
            Meta::Return(ret) => {
                ret.returns_val = match self.value_depth {
                    0 => Some(false),
                    1 => {
                        self.value_depth = 0;
                        Some(true)
                    }
                    depth => {
                        return Err(MalformedControlFlow::ReturnArity { location, depth });
                    }
                };
            }
        }
        Ok(())
    }

    fn open(&mut self, id: MetaId) {
        self.control_stack.push(OpenConstruct {
            id,
            entry_depth: self.value_depth,
        });
    }

    /// Bind a branch to the construct `level` entries below the top of
    /// the control stack.
    fn resolve_branch<A: Address>(
        &mut self,
        id: MetaId,
        location: A,
        br: &mut BrMeta<A>,
        visited: &[MetaInstruction<A>],
    ) -> Result<(), MalformedControlFlow<A>> {
        let open = self.control_stack.len();
        let slot = open
            .checked_sub(br.level as usize + 1)
            .ok_or(MalformedControlFlow::BranchTooDeep {
                location,
                level: br.level,
                open,
            })?;
        let construct = self.control_stack[slot];
        let target = &visited[construct.id.index()];

        match &target.meta {
            Meta::BeginBlock(_) | Meta::If(_) => {
                br.implicit_pops = Some(0);
                self.forward.push((id, construct.id));
            }
            Meta::BeginLoop(_) => {
                let pops = self
                    .value_depth
                    .checked_sub(construct.entry_depth)
                    .ok_or(MalformedControlFlow::ValueStackUnderflow { location })?;
                br.target = Some(target.location);
                br.implicit_pops = Some(pops);
            }
            _ => {
                return Err(MalformedControlFlow::InvalidBranchTarget {
                    location,
                    target: target.kind(),
                });
            }
        }
        br.construct = Some(construct.id);
        Ok(())
    }

    /// Fill in the targets of branches that leave a block or if.
    fn patch_forward_branches<A: Address>(&self, metas: &mut [MetaInstruction<A>]) {
        for &(br_id, construct) in &self.forward {
            let end = metas[construct.index()].end_location();
            if let Meta::Br(br) = &mut metas[br_id.index()].meta {
                br.target = end;
            }
        }
    }
}
