// PolyCL Generalizers
//
// A generalizer reduces a runtime value to a cache tag and expands a
// tag into the ordered specializer forms the tag satisfies. Each
// dispatch axis carries the priority-sorted generalizers of the
// specializers seen at that axis; the highest-priority generalizer
// claiming a value owns its cache tag.
//
// Coherence invariant: tag namespaces never overlap across families,
// so two values sharing a tag always satisfy the same specializers.

use std::rc::Rc;

use crate::engine::Engine;
use crate::records::RecordTypeId;
use crate::specializer::Specializer;
use crate::value::{TypeTag, Value};

/// A dispatch-cache index computed from one value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Index into the engine's interned eql literals.
    Eql(u32),
    /// Index into the engine's interned head literals.
    Head(u32),
    Record(RecordTypeId),
    Builtin(TypeTag),
    /// The universal bucket.
    Const,
    /// Extension tag: kind key plus kind-defined discriminant.
    Custom(&'static str, u64),
}

/// Maps runtime values to tags and tags to satisfied specializers.
pub trait Generalizer {
    /// Higher priority generalizers are consulted first on an axis.
    fn priority(&self) -> i32;

    /// The tag governing `value`, or None to defer to lower priority.
    /// `None` as the value means the dispatch position had no value.
    fn tag_of(&self, engine: &Engine, value: Option<&Value>) -> Option<Tag>;

    /// Specializer forms satisfied by `tag`, most specific first.
    fn specializers_of(&self, engine: &Engine, tag: &Tag) -> Vec<Specializer>;
}

/// Interned eql and head literals, populated at method-definition time
/// so tag extraction is O(1) over declared literals only.
#[derive(Debug, Default)]
pub struct LiteralTables {
    eql: Vec<Value>,
    head: Vec<Value>,
}

impl LiteralTables {
    pub fn intern_eql(&mut self, value: &Value) -> u32 {
        intern(&mut self.eql, value)
    }

    pub fn intern_head(&mut self, value: &Value) -> u32 {
        intern(&mut self.head, value)
    }

    pub fn eql_index(&self, value: &Value) -> Option<u32> {
        index_of(&self.eql, value)
    }

    pub fn head_index(&self, value: &Value) -> Option<u32> {
        index_of(&self.head, value)
    }

    pub fn eql_literal(&self, index: u32) -> Option<Value> {
        self.eql.get(index as usize).cloned()
    }

    pub fn head_literal(&self, index: u32) -> Option<Value> {
        self.head.get(index as usize).cloned()
    }
}

fn intern(table: &mut Vec<Value>, value: &Value) -> u32 {
    if let Some(i) = index_of(table, value) {
        return i;
    }
    table.push(value.clone());
    (table.len() - 1) as u32
}

fn index_of(table: &[Value], value: &Value) -> Option<u32> {
    table
        .iter()
        .position(|v| v.eql(value))
        .map(|i| i as u32)
}

/// Value-identity specializers.
pub struct EqlGeneralizer;

impl Generalizer for EqlGeneralizer {
    fn priority(&self) -> i32 {
        100
    }

    fn tag_of(&self, engine: &Engine, value: Option<&Value>) -> Option<Tag> {
        engine.eql_literal_index(value?).map(Tag::Eql)
    }

    fn specializers_of(&self, engine: &Engine, tag: &Tag) -> Vec<Specializer> {
        match tag {
            Tag::Eql(i) => engine
                .eql_literal(*i)
                .map(|v| vec![Specializer::Eql(v)])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// First-element-of-list specializers.
pub struct HeadGeneralizer;

impl Generalizer for HeadGeneralizer {
    fn priority(&self) -> i32 {
        80
    }

    fn tag_of(&self, engine: &Engine, value: Option<&Value>) -> Option<Tag> {
        match value? {
            Value::List(items) => {
                let head = items.first()?;
                engine.head_literal_index(head).map(Tag::Head)
            }
            _ => None,
        }
    }

    fn specializers_of(&self, engine: &Engine, tag: &Tag) -> Vec<Specializer> {
        match tag {
            Tag::Head(i) => engine
                .head_literal(*i)
                .map(|v| vec![Specializer::Head(v)])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Nominal record-type specializers with single-parent inheritance.
pub struct RecordGeneralizer;

impl Generalizer for RecordGeneralizer {
    fn priority(&self) -> i32 {
        50
    }

    fn tag_of(&self, _engine: &Engine, value: Option<&Value>) -> Option<Tag> {
        value?.record_type().map(Tag::Record)
    }

    fn specializers_of(&self, engine: &Engine, tag: &Tag) -> Vec<Specializer> {
        match tag {
            Tag::Record(tid) => engine
                .record_ancestry(*tid)
                .into_iter()
                .map(Specializer::Type)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Builtin runtime-type specializers.
pub struct BuiltinTypeGeneralizer;

impl Generalizer for BuiltinTypeGeneralizer {
    fn priority(&self) -> i32 {
        10
    }

    fn tag_of(&self, _engine: &Engine, value: Option<&Value>) -> Option<Tag> {
        Some(match value {
            Some(v) => Tag::Builtin(v.type_tag()),
            None => Tag::Builtin(TypeTag::Absent),
        })
    }

    fn specializers_of(&self, _engine: &Engine, tag: &Tag) -> Vec<Specializer> {
        match tag {
            Tag::Builtin(TypeTag::Absent) => Vec::new(),
            Tag::Builtin(t) => t
                .with_supertypes()
                .into_iter()
                .map(Specializer::Builtin)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The total fallback; seeds every axis so each dispatch is total.
pub struct UniversalGeneralizer;

impl Generalizer for UniversalGeneralizer {
    fn priority(&self) -> i32 {
        0
    }

    fn tag_of(&self, _engine: &Engine, _value: Option<&Value>) -> Option<Tag> {
        Some(Tag::Const)
    }

    fn specializers_of(&self, _engine: &Engine, tag: &Tag) -> Vec<Specializer> {
        match tag {
            Tag::Const => vec![Specializer::Universal],
            _ => Vec::new(),
        }
    }
}

/// Resolves a specializer form to the generalizers governing it.
/// Third parties register additional resolvers for Custom kinds.
pub trait GeneralizerResolver {
    fn generalizers_for(&self, spec: &Specializer) -> Option<Vec<Rc<dyn Generalizer>>>;
}

struct BuiltinResolver {
    eql: Rc<dyn Generalizer>,
    head: Rc<dyn Generalizer>,
    record: Rc<dyn Generalizer>,
    builtin: Rc<dyn Generalizer>,
}

impl GeneralizerResolver for BuiltinResolver {
    fn generalizers_for(&self, spec: &Specializer) -> Option<Vec<Rc<dyn Generalizer>>> {
        match spec {
            // The universal specializer contributes no generalizer;
            // axes are seeded with the universal fallback separately.
            Specializer::Universal => Some(Vec::new()),
            Specializer::Eql(_) => Some(vec![self.eql.clone()]),
            Specializer::Head(_) => Some(vec![self.head.clone()]),
            Specializer::Type(_) => Some(vec![self.record.clone()]),
            Specializer::Builtin(_) => Some(vec![self.builtin.clone()]),
            Specializer::Custom(_) => None,
        }
    }
}

/// The registry mapping specializer forms to generalizers.
pub struct GeneralizerRegistry {
    resolvers: Vec<Rc<dyn GeneralizerResolver>>,
    universal: Rc<dyn Generalizer>,
}

impl GeneralizerRegistry {
    pub fn new() -> Self {
        Self {
            resolvers: vec![Rc::new(BuiltinResolver {
                eql: Rc::new(EqlGeneralizer),
                head: Rc::new(HeadGeneralizer),
                record: Rc::new(RecordGeneralizer),
                builtin: Rc::new(BuiltinTypeGeneralizer),
            })],
            universal: Rc::new(UniversalGeneralizer),
        }
    }

    pub fn register(&mut self, resolver: Rc<dyn GeneralizerResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn universal(&self) -> Rc<dyn Generalizer> {
        self.universal.clone()
    }

    /// All generalizers contributed for a specializer, deduplicated by
    /// identity. Order within the result does not matter; axes re-sort
    /// by priority when merging.
    pub fn resolve(&self, spec: &Specializer) -> Vec<Rc<dyn Generalizer>> {
        let mut out: Vec<Rc<dyn Generalizer>> = Vec::new();
        for resolver in &self.resolvers {
            if let Some(gens) = resolver.generalizers_for(spec) {
                for g in gens {
                    let seen = out
                        .iter()
                        .any(|have| Rc::as_ptr(have) as *const () == Rc::as_ptr(&g) as *const ());
                    if !seen {
                        out.push(g);
                    }
                }
            }
        }
        out
    }
}

impl Default for GeneralizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
