// PolyCL Generic Functions
//
// Per-generic definition-time state: the method table, the
// dispatch-order table (which positions are inspected, with which
// generalizers, in which importance order), and the installed
// invocation entry point. Entry points are replaced wholesale on every
// definition event, never mutated, so in-flight calls keep the chain
// they captured.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::Dispatcher;
use crate::combine::Combined;
use crate::engine::Engine;
use crate::generalizer::{Generalizer, Tag};
use crate::method::Method;
use crate::specializer::Specializer;
use crate::symbol::SymbolId;
use crate::value::Value;

/// Unique identifier for a generic function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericId(pub u32);

/// One dispatched position: a mandatory argument or a context
/// expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    Arg(usize),
    Context(SymbolId),
}

impl DispatchKey {
    /// The live value at this position, None when absent.
    pub(crate) fn extract(&self, engine: &Engine, args: &[Value]) -> Option<Value> {
        match self {
            DispatchKey::Arg(i) => args.get(*i).cloned(),
            DispatchKey::Context(sym) => engine.context_value(*sym),
        }
    }
}

/// One entry of the dispatch-order table: a key plus the merged,
/// priority-sorted generalizers of every specializer seen at it.
#[derive(Clone)]
pub struct DispatchAxis {
    pub key: DispatchKey,
    pub(crate) generalizers: Vec<Rc<dyn Generalizer>>,
}

impl DispatchAxis {
    /// New axis seeded with the universal generalizer so the axis is
    /// total.
    pub(crate) fn new(key: DispatchKey, universal: Rc<dyn Generalizer>) -> Self {
        Self {
            key,
            generalizers: vec![universal],
        }
    }

    /// Merge generalizers into the axis, deduplicated by identity,
    /// kept sorted by descending priority.
    pub(crate) fn merge(&mut self, incoming: Vec<Rc<dyn Generalizer>>) {
        for g in incoming {
            let seen = self.generalizers.iter().any(|have| {
                Rc::as_ptr(have) as *const () == Rc::as_ptr(&g) as *const ()
            });
            if !seen {
                self.generalizers.push(g);
            }
        }
        self.generalizers
            .sort_by_key(|g| std::cmp::Reverse(g.priority()));
    }

    /// The cache tag for a value: the highest-priority claiming
    /// generalizer owns the tag.
    pub(crate) fn primary_tag(&self, engine: &Engine, probe: Option<&Value>) -> Tag {
        for g in &self.generalizers {
            if let Some(tag) = g.tag_of(engine, probe) {
                return tag;
            }
        }
        Tag::Const
    }

    /// The ordered specializer forms a value satisfies at this axis:
    /// every claiming generalizer's list, concatenated in priority
    /// order, most specific first overall.
    pub(crate) fn candidate_specializers(
        &self,
        engine: &Engine,
        probe: Option<&Value>,
    ) -> Vec<Specializer> {
        let mut out = Vec::new();
        for g in &self.generalizers {
            if let Some(tag) = g.tag_of(engine, probe) {
                out.extend(g.specializers_of(engine, &tag));
            }
        }
        out
    }
}

/// The installed callable of a generic function.
pub(crate) enum EntryPoint {
    /// No dispatched position: the combined method is called directly,
    /// bypassing the dispatch cache. Built on first call so qualifier
    /// errors surface at combination-build time.
    Direct {
        methods: Vec<Rc<Method>>,
        combined: RefCell<Option<Combined>>,
    },
    /// Root of the dispatcher chain, least-important axis first.
    Chain(Rc<Dispatcher>),
}

/// Declaration metadata for a generic function.
#[derive(Debug, Clone, Default)]
pub struct GenericOptions {
    /// Ignored by the core; kept for the describe layer.
    pub documentation: Option<String>,
    /// Argument precedence order: a permutation of the mandatory
    /// parameter names, most important first.
    pub precedence: Option<Vec<String>>,
}

pub struct GenericFunction {
    pub name: SymbolId,
    pub(crate) display_name: Rc<str>,
    pub params: Vec<SymbolId>,
    pub documentation: Option<String>,
    /// Importance order over argument indices; None means declaration
    /// order.
    pub(crate) precedence: Option<Vec<usize>>,
    /// Dispatch axes in importance order, most important first.
    pub(crate) axes: Vec<DispatchAxis>,
    /// Methods in declaration order.
    pub(crate) methods: Vec<Rc<Method>>,
    pub(crate) entry: Rc<EntryPoint>,
}

impl GenericFunction {
    pub(crate) fn new(name: SymbolId, display_name: Rc<str>, params: Vec<SymbolId>) -> Self {
        Self {
            name,
            display_name,
            params,
            documentation: None,
            precedence: None,
            axes: Vec::new(),
            methods: Vec::new(),
            entry: Rc::new(EntryPoint::Direct {
                methods: Vec::new(),
                combined: RefCell::new(None),
            }),
        }
    }

    /// Find or create the axis for a key.
    pub(crate) fn axis_mut(
        &mut self,
        key: DispatchKey,
        universal: Rc<dyn Generalizer>,
    ) -> &mut DispatchAxis {
        if let Some(pos) = self.axes.iter().position(|a| a.key == key) {
            return &mut self.axes[pos];
        }
        self.axes.push(DispatchAxis::new(key, universal));
        let last = self.axes.len() - 1;
        &mut self.axes[last]
    }

    fn importance_rank(&self, key: &DispatchKey) -> usize {
        match key {
            DispatchKey::Arg(i) => match &self.precedence {
                Some(order) => order.iter().position(|p| p == i).unwrap_or(*i),
                None => *i,
            },
            // Context axes rank least important, after all arguments.
            DispatchKey::Context(_) => usize::MAX,
        }
    }

    /// Keep axes in importance order; the sort is stable, so context
    /// axes retain first-seen order among themselves.
    pub(crate) fn sort_axes(&mut self) {
        let mut axes = std::mem::take(&mut self.axes);
        axes.sort_by_key(|a| self.importance_rank(&a.key));
        self.axes = axes;
    }

    /// Build a fresh entry point over the current axes and methods.
    /// The dispatch chain runs least-important axis first, so the
    /// most-decisive axis is resolved last and its ranking dominates.
    pub(crate) fn rebuild_entry(&mut self, gid: GenericId) {
        self.entry = if self.axes.is_empty() {
            Rc::new(EntryPoint::Direct {
                methods: self.methods.clone(),
                combined: RefCell::new(None),
            })
        } else {
            let order: Vec<DispatchAxis> = self.axes.iter().rev().cloned().collect();
            Rc::new(EntryPoint::Chain(Rc::new(Dispatcher::new(
                gid,
                self.display_name.clone(),
                Rc::new(order),
                0,
                self.methods.clone(),
            ))))
        };
    }

    /// Position of a method with the same identity key, if any.
    pub(crate) fn find_method(
        &self,
        specializers: &[Specializer],
        context: &[(SymbolId, Specializer)],
        qualifiers: &[crate::method::Qualifier],
    ) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.same_identity(specializers, context, qualifiers))
    }
}
