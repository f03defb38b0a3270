use std::fmt;

/// Opaque code address attached to every marker.
///
/// Only equality and ordering are ever used; the resolver never does
/// arithmetic on addresses.
pub trait Address: Copy + Eq + Ord + fmt::Debug {}

impl<T: Copy + Eq + Ord + fmt::Debug> Address for T {}

/// Index of a marker within its `MarkerStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetaId(pub(crate) usize);

impl MetaId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Marker kind, used for lookups and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKind {
    Push,
    Pop,
    BeginBlock,
    BeginLoop,
    If,
    Else,
    End,
    Br,
    Return,
}

impl fmt::Display for MetaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetaKind::Push => "push",
            MetaKind::Pop => "pop",
            MetaKind::BeginBlock => "block",
            MetaKind::BeginLoop => "loop",
            MetaKind::If => "if",
            MetaKind::Else => "else",
            MetaKind::End => "end",
            MetaKind::Br => "br",
            MetaKind::Return => "return",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginBlockMeta<A> {
    /// Location of the matching `end`.
    pub end_location: Option<A>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginLoopMeta<A> {
    /// Value-stack depth when the loop was entered.
    pub stack_depth_at_start: Option<u32>,
    /// Location of the matching `end`.
    pub end_location: Option<A>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfMeta<A> {
    /// Location of the matching `end`.
    pub end_location: Option<A>,
    /// The paired `else`, if the `if` has one.
    pub else_ref: Option<MetaId>,
}

// `A` need not implement `Default`.
impl<A> Default for BeginBlockMeta<A> {
    fn default() -> Self {
        BeginBlockMeta { end_location: None }
    }
}

impl<A> Default for BeginLoopMeta<A> {
    fn default() -> Self {
        BeginLoopMeta {
            stack_depth_at_start: None,
            end_location: None,
        }
    }
}

impl<A> Default for IfMeta<A> {
    fn default() -> Self {
        IfMeta {
            end_location: None,
            else_ref: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElseMeta {
    pub if_ref: Option<MetaId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrMeta<A> {
    /// Nesting distance from the innermost open construct.
    pub level: u32,
    /// Construct the branch leaves (block/if) or re-enters (loop).
    pub construct: Option<MetaId>,
    /// End address for forward branches, loop header for back-edges.
    pub target: Option<A>,
    /// Values discarded before control transfers.
    pub implicit_pops: Option<u32>,
}

impl<A> BrMeta<A> {
    pub fn new(level: u32) -> Self {
        BrMeta {
            level,
            construct: None,
            target: None,
            implicit_pops: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReturnMeta {
    pub returns_val: Option<bool>,
}

/// Kind-specific payload of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meta<A> {
    Push,
    Pop,
    BeginBlock(BeginBlockMeta<A>),
    BeginLoop(BeginLoopMeta<A>),
    If(IfMeta<A>),
    Else(ElseMeta),
    End,
    Br(BrMeta<A>),
    Return(ReturnMeta),
}

/// One structurally relevant point in a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaInstruction<A> {
    pub location: A,
    pub meta: Meta<A>,
}

impl<A: Address> MetaInstruction<A> {
    pub fn push(location: A) -> Self {
        Self::new(location, Meta::Push)
    }

    pub fn pop(location: A) -> Self {
        Self::new(location, Meta::Pop)
    }

    pub fn begin_block(location: A) -> Self {
        Self::new(location, Meta::BeginBlock(BeginBlockMeta::default()))
    }

    pub fn begin_loop(location: A) -> Self {
        Self::new(location, Meta::BeginLoop(BeginLoopMeta::default()))
    }

    pub fn if_(location: A) -> Self {
        Self::new(location, Meta::If(IfMeta::default()))
    }

    pub fn else_(location: A) -> Self {
        Self::new(location, Meta::Else(ElseMeta::default()))
    }

    pub fn end(location: A) -> Self {
        Self::new(location, Meta::End)
    }

    pub fn br(location: A, level: u32) -> Self {
        Self::new(location, Meta::Br(BrMeta::new(level)))
    }

    pub fn return_(location: A) -> Self {
        Self::new(location, Meta::Return(ReturnMeta::default()))
    }

    fn new(location: A, meta: Meta<A>) -> Self {
        MetaInstruction { location, meta }
    }

    pub fn kind(&self) -> MetaKind {
        match self.meta {
            Meta::Push => MetaKind::Push,
            Meta::Pop => MetaKind::Pop,
            Meta::BeginBlock(_) => MetaKind::BeginBlock,
            Meta::BeginLoop(_) => MetaKind::BeginLoop,
            Meta::If(_) => MetaKind::If,
            Meta::Else(_) => MetaKind::Else,
            Meta::End => MetaKind::End,
            Meta::Br(_) => MetaKind::Br,
            Meta::Return(_) => MetaKind::Return,
        }
    }

    /// End address of a block, loop or if; `None` for other kinds or
    /// before resolution.
    pub fn end_location(&self) -> Option<A> {
        match &self.meta {
            Meta::BeginBlock(block) => block.end_location,
            Meta::BeginLoop(lp) => lp.end_location,
            Meta::If(if_) => if_.end_location,
            _ => None,
        }
    }

    pub fn as_br(&self) -> Option<&BrMeta<A>> {
        match &self.meta {
            Meta::Br(br) => Some(br),
            _ => None,
        }
    }

    pub fn as_if(&self) -> Option<&IfMeta<A>> {
        match &self.meta {
            Meta::If(if_) => Some(if_),
            _ => None,
        }
    }

    pub fn as_else(&self) -> Option<&ElseMeta> {
        match &self.meta {
            Meta::Else(else_) => Some(else_),
            _ => None,
        }
    }

    pub fn as_loop(&self) -> Option<&BeginLoopMeta<A>> {
        match &self.meta {
            Meta::BeginLoop(lp) => Some(lp),
            _ => None,
        }
    }

    pub fn as_return(&self) -> Option<&ReturnMeta> {
        match &self.meta {
            Meta::Return(ret) => Some(ret),
            _ => None,
        }
    }

    /// Reset every resolution field to unset.
    pub(crate) fn clear_resolution(&mut self) {
        match &mut self.meta {
            Meta::BeginBlock(block) => *block = BeginBlockMeta::default(),
            Meta::BeginLoop(lp) => *lp = BeginLoopMeta::default(),
            Meta::If(if_) => *if_ = IfMeta::default(),
            Meta::Else(else_) => *else_ = ElseMeta::default(),
            Meta::Br(br) => *br = BrMeta::new(br.level),
            Meta::Return(ret) => *ret = ReturnMeta::default(),
            Meta::Push | Meta::Pop | Meta::End => {}
        }
    }
}

impl<A: Address> fmt::Display for MetaInstruction<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.location, self.kind())?;
        match &self.meta {
            Meta::BeginBlock(BeginBlockMeta { end_location }) => {
                write!(f, " end={end_location:?}")
            }
            Meta::BeginLoop(lp) => write!(
                f,
                " depth={:?} end={:?}",
                lp.stack_depth_at_start, lp.end_location
            ),
            Meta::If(if_) => write!(
                f,
                " end={:?} else={:?}",
                if_.end_location,
                if_.else_ref.map(MetaId::index)
            ),
            Meta::Else(else_) => write!(f, " if={:?}", else_.if_ref.map(MetaId::index)),
            Meta::Br(br) => write!(
                f,
                " {} -> {:?} pops={:?}",
                br.level, br.target, br.implicit_pops
            ),
            Meta::Return(ret) => write!(f, " value={:?}", ret.returns_val),
            Meta::Push | Meta::Pop | Meta::End => Ok(()),
        }
    }
}
