// PolyCL Dispatch Cache
//
// The dispatcher chain: one layer per remaining dispatch axis, each
// with a private tag-indexed table mapping a value's tag to either the
// next layer or the terminal combined method. Population happens on
// miss, is a pure function of the generic's method set and the
// generalizer registry at that instant, and is memoized into the tag
// table before the computed node is invoked.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::trace;

use crate::combine::Combined;
use crate::engine::Engine;
use crate::error::DispatchError;
use crate::generalizer::Tag;
use crate::generic::{DispatchAxis, GenericId};
use crate::method::{Method, MethodId};
use crate::value::Value;

/// A snapshot of the engine's dispatch instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub combined_builds: u64,
    pub entry_rebuilds: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCells {
    hits: Cell<u64>,
    misses: Cell<u64>,
    combined: Cell<u64>,
    rebuilds: Cell<u64>,
}

impl StatCells {
    pub(crate) fn record_hit(&self) {
        self.hits.set(self.hits.get() + 1);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.set(self.misses.get() + 1);
    }

    pub(crate) fn record_combined_build(&self) {
        self.combined.set(self.combined.get() + 1);
    }

    pub(crate) fn record_entry_rebuild(&self) {
        self.rebuilds.set(self.rebuilds.get() + 1);
    }

    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            cache_hits: self.hits.get(),
            cache_misses: self.misses.get(),
            combined_builds: self.combined.get(),
            entry_rebuilds: self.rebuilds.get(),
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.set(0);
        self.misses.set(0);
        self.combined.set(0);
        self.rebuilds.set(0);
    }
}

/// Memo key for the engine-wide dispatcher table: generic, position in
/// the dispatch order, and the ordered surviving method subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct DispatcherKey {
    pub generic: GenericId,
    pub position: usize,
    pub methods: Vec<MethodId>,
}

/// What a tag resolves to: another dispatch layer or the terminal
/// combined method.
#[derive(Clone)]
pub(crate) enum DispatchNode {
    Next(Rc<Dispatcher>),
    Terminal(Combined),
}

/// One layer of the dispatch chain.
pub struct Dispatcher {
    generic: GenericId,
    name: Rc<str>,
    /// Axis sequence for the whole chain, least-important first.
    order: Rc<Vec<DispatchAxis>>,
    position: usize,
    /// Surviving methods, sorted by the ranks of the axes already
    /// dispatched (declaration order before the first axis).
    methods: Vec<Rc<Method>>,
    table: RefCell<HashMap<Tag, DispatchNode>>,
}

impl Dispatcher {
    pub(crate) fn new(
        generic: GenericId,
        name: Rc<str>,
        order: Rc<Vec<DispatchAxis>>,
        position: usize,
        methods: Vec<Rc<Method>>,
    ) -> Self {
        Self {
            generic,
            name,
            order,
            position,
            methods,
            table: RefCell::new(HashMap::new()),
        }
    }

    /// Walk this layer: tag the axis value, consult the tag table, and
    /// continue into the next layer or the combined method. The
    /// computed node is stored before it is invoked.
    pub(crate) fn dispatch(&self, engine: &Engine, args: &[Value]) -> Result<Value, DispatchError> {
        let axis = &self.order[self.position];
        let probe = axis.key.extract(engine, args);
        let tag = axis.primary_tag(engine, probe.as_ref());

        let cached = self.table.borrow().get(&tag).cloned();
        let node = match cached {
            Some(node) => {
                engine.stats().record_hit();
                node
            }
            None => {
                engine.stats().record_miss();
                trace!(generic = %self.name, ?tag, "dispatch cache miss");
                let node = self.resolve(engine, probe.as_ref())?;
                self.table.borrow_mut().insert(tag, node.clone());
                node
            }
        };

        match node {
            DispatchNode::Next(next) => next.dispatch(engine, args),
            DispatchNode::Terminal(combined) => combined(engine, args),
        }
    }

    /// Miss handling: keep the methods whose specializer at this axis
    /// is satisfied by any specializer the probe value's tags list
    /// (membership, not equality), rank them by position in that list,
    /// and recurse into the next axis or the effective-method builder.
    /// The sort is stable, so earlier axes' ordering (and ultimately
    /// declaration order) breaks ties.
    fn resolve(
        &self,
        engine: &Engine,
        probe: Option<&Value>,
    ) -> Result<DispatchNode, DispatchError> {
        let axis = &self.order[self.position];
        let candidates = axis.candidate_specializers(engine, probe);

        let mut ranked: SmallVec<[(usize, Rc<Method>); 8]> = SmallVec::new();
        for m in &self.methods {
            let spec = m.specializer_at(&axis.key);
            if let Some(rank) = candidates.iter().position(|c| *c == spec) {
                ranked.push((rank, m.clone()));
            }
        }
        ranked.sort_by_key(|(rank, _)| *rank);
        let survivors: Vec<Rc<Method>> = ranked.into_iter().map(|(_, m)| m).collect();

        if self.position + 1 < self.order.len() {
            Ok(DispatchNode::Next(engine.dispatcher_for(
                self.generic,
                &self.name,
                self.order.clone(),
                self.position + 1,
                survivors,
            )))
        } else {
            Ok(DispatchNode::Terminal(engine.combined_for(
                self.generic,
                &self.name,
                &survivors,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_cells_snapshot_and_reset() {
        let stats = StatCells::default();
        stats.record_hit();
        stats.record_miss();
        stats.record_miss();
        stats.record_combined_build();
        stats.record_entry_rebuild();
        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 2);
        assert_eq!(snap.combined_builds, 1);
        assert_eq!(snap.entry_rebuilds, 1);
        stats.reset();
        assert_eq!(stats.snapshot(), DispatchStats::default());
    }
}
