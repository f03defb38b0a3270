use std::fmt;
use std::ops::Index;

use tracing::debug_span;

use crate::error::MalformedControlFlow;
use crate::meta::{Address, MetaId, MetaInstruction, MetaKind};
use crate::resolve::Resolver;

/// Markers of one function body, in discovery order.
///
/// Built in two phases: `collect` every marker, then `resolve` once to
/// fill in the cross-references. The stream owns every record; links
/// between records are `MetaId`s into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStream<A> {
    metas: Vec<MetaInstruction<A>>,
    resolved: bool,
}

impl<A> Default for MarkerStream<A> {
    fn default() -> Self {
        MarkerStream {
            metas: Vec::new(),
            resolved: false,
        }
    }
}

impl<A: Address> MarkerStream<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a marker. No validation happens here.
    pub fn collect(&mut self, meta: MetaInstruction<A>) -> MetaId {
        let id = MetaId(self.metas.len());
        self.metas.push(meta);
        self.resolved = false;
        id
    }

    /// First marker of `kind` located at `address`.
    pub fn find(&self, address: A, kind: MetaKind) -> Option<&MetaInstruction<A>> {
        self.position(address, kind).map(|id| &self[id])
    }

    /// Id of the first marker of `kind` located at `address`.
    pub fn position(&self, address: A, kind: MetaKind) -> Option<MetaId> {
        self.metas
            .iter()
            .position(|meta| meta.location == address && meta.kind() == kind)
            .map(MetaId)
    }

    pub fn get(&self, id: MetaId) -> Option<&MetaInstruction<A>> {
        self.metas.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetaId, &MetaInstruction<A>)> {
        self.metas
            .iter()
            .enumerate()
            .map(|(idx, meta)| (MetaId(idx), meta))
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    /// True once `resolve` has succeeded and nothing was collected since.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Run the control-flow resolver over the whole stream.
    ///
    /// Every call starts from an empty control stack and a value depth of
    /// zero, so resolving again after more markers were collected is fine.
    /// On failure all resolution fields are cleared: callers never see a
    /// half-resolved stream.
    pub fn resolve(&mut self) -> Result<(), MalformedControlFlow<A>> {
        let _span = debug_span!("resolve", markers = self.metas.len()).entered();
        self.clear_resolution();
        match Resolver::new().run(&mut self.metas) {
            Ok(()) => {
                self.resolved = true;
                Ok(())
            }
            Err(err) => {
                self.clear_resolution();
                Err(err)
            }
        }
    }

    fn clear_resolution(&mut self) {
        for meta in &mut self.metas {
            meta.clear_resolution();
        }
        self.resolved = false;
    }
}

impl<A> Index<MetaId> for MarkerStream<A> {
    type Output = MetaInstruction<A>;

    fn index(&self, id: MetaId) -> &Self::Output {
        &self.metas[id.index()]
    }
}

impl<A: Address> FromIterator<MetaInstruction<A>> for MarkerStream<A> {
    fn from_iter<I: IntoIterator<Item = MetaInstruction<A>>>(iter: I) -> Self {
        let mut stream = Self::new();
        stream.extend(iter);
        stream
    }
}

impl<A: Address> Extend<MetaInstruction<A>> for MarkerStream<A> {
    fn extend<I: IntoIterator<Item = MetaInstruction<A>>>(&mut self, iter: I) {
        for meta in iter {
            self.collect(meta);
        }
    }
}

impl<A: Address> fmt::Display for MarkerStream<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, meta) in self.iter() {
            writeln!(f, "  [{:3}] {meta}", id.index())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_first_match_of_kind() {
        let stream: MarkerStream<u32> = [
            MetaInstruction::pop(0x10),
            MetaInstruction::br(0x10, 0),
            MetaInstruction::br(0x10, 1),
        ]
        .into_iter()
        .collect();

        let br = stream.find(0x10, MetaKind::Br).and_then(|m| m.as_br());
        assert_eq!(br.map(|br| br.level), Some(0));
        assert_eq!(stream.position(0x10, MetaKind::Pop), Some(MetaId(0)));
        assert!(stream.find(0x10, MetaKind::Push).is_none());
        assert!(stream.find(0x14, MetaKind::Br).is_none());
    }

    #[test]
    fn ids_index_in_collection_order() {
        let mut stream = MarkerStream::new();
        let ids: Vec<_> = (0..3u32)
            .map(|loc| stream.collect(MetaInstruction::push(loc)))
            .collect();
        for (id, (iter_id, meta)) in ids.iter().zip(stream.iter()) {
            assert_eq!(*id, iter_id);
            assert_eq!(stream[*id].location, meta.location);
        }
        assert_eq!(ids[2].index(), 2);
    }

    #[test]
    fn collect_invalidates_resolution() {
        let mut stream = MarkerStream::new();
        stream.collect(MetaInstruction::begin_block(0u32));
        stream.collect(MetaInstruction::end(4));
        stream.resolve().unwrap();
        assert!(stream.is_resolved());

        stream.collect(MetaInstruction::push(8));
        assert!(!stream.is_resolved());
    }

    #[test]
    fn display_lists_every_marker() {
        let mut stream = MarkerStream::new();
        stream.collect(MetaInstruction::begin_loop(0u32));
        stream.collect(MetaInstruction::br(4, 0));
        stream.collect(MetaInstruction::end(8));
        stream.resolve().unwrap();

        let listing = stream.to_string();
        assert_eq!(listing.lines().count(), 3);
        assert!(listing.contains("loop depth=Some(0) end=Some(8)"));
        assert!(listing.contains("br 0 -> Some(0) pops=Some(0)"));
    }
}
