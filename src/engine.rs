// PolyCL Engine
//
// The process-wide owner of all dispatch state: symbol table, record
// types, generalizer registry, generic functions, the dispatcher and
// combined-method memo tables, context values, and instrumentation.
// Definition events mutate through `&mut Engine`; calls read through
// `&Engine` and populate caches as a side effect. Caches are memoizing
// stores, never authoritative: they can be discarded at any time
// without changing behavior.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::cache::{DispatchStats, Dispatcher, DispatcherKey, StatCells};
use crate::combine::{build_standard, CombinationStrategy, Combined, StandardCombination};
use crate::error::DispatchError;
use crate::generalizer::{Generalizer, GeneralizerRegistry, GeneralizerResolver, LiteralTables};
use crate::generic::{
    DispatchAxis, DispatchKey, EntryPoint, GenericFunction, GenericId, GenericOptions,
};
use crate::method::{format_qualifiers, Method, MethodBody, MethodId, Qualifier};
use crate::records::{RecordInstance, RecordRegistry, RecordTypeId};
use crate::specializer::Specializer;
use crate::symbol::{SymbolId, SymbolTable};
use crate::value::Value;

/// Memo key for combined methods: generic plus the resolved, ordered
/// method list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CombinedKey {
    generic: GenericId,
    methods: Vec<MethodId>,
}

/// The under-construction sentinel guards re-entrant builds: observing
/// Building while building is a cyclic definition.
#[derive(Clone)]
enum CombinedEntry {
    Building,
    Ready(Combined),
}

/// Introspection view of one method, for the describe layer.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub qualifiers: Vec<Qualifier>,
    pub specializers: Vec<Specializer>,
    pub context: Vec<(SymbolId, Specializer)>,
    pub uses_next_method: bool,
}

pub struct Engine {
    symbols: RefCell<SymbolTable>,
    records: RefCell<RecordRegistry>,
    registry: RefCell<GeneralizerRegistry>,
    literals: RefCell<LiteralTables>,
    generics: RefCell<Vec<GenericFunction>>,
    generic_names: RefCell<HashMap<SymbolId, GenericId>>,
    combinations: RefCell<Vec<Rc<dyn CombinationStrategy>>>,
    combined_memo: RefCell<HashMap<CombinedKey, CombinedEntry>>,
    dispatchers: RefCell<HashMap<DispatcherKey, Rc<Dispatcher>>>,
    context: RefCell<HashMap<SymbolId, Value>>,
    stats: StatCells,
    next_method_id: Cell<u64>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            symbols: RefCell::new(SymbolTable::new()),
            records: RefCell::new(RecordRegistry::new()),
            registry: RefCell::new(GeneralizerRegistry::new()),
            literals: RefCell::new(LiteralTables::default()),
            generics: RefCell::new(Vec::new()),
            generic_names: RefCell::new(HashMap::new()),
            combinations: RefCell::new(vec![Rc::new(StandardCombination)]),
            combined_memo: RefCell::new(HashMap::new()),
            dispatchers: RefCell::new(HashMap::new()),
            context: RefCell::new(HashMap::new()),
            stats: StatCells::default(),
            next_method_id: Cell::new(0),
        }
    }

    // ----- symbols -----

    pub fn intern(&self, name: &str) -> SymbolId {
        self.symbols.borrow_mut().intern(name)
    }

    pub fn symbol_name(&self, id: SymbolId) -> String {
        self.symbols.borrow().name(id).to_string()
    }

    // ----- record types -----

    pub fn define_record_type(
        &mut self,
        name: &str,
        parent: Option<RecordTypeId>,
        fields: &[&str],
    ) -> RecordTypeId {
        let name_sym = self.intern(name);
        let field_syms: Vec<SymbolId> = fields.iter().map(|f| self.intern(f)).collect();
        self.records.borrow_mut().define(name_sym, parent, field_syms)
    }

    pub fn record_type(&self, name: &str) -> Option<RecordTypeId> {
        let sym = self.symbols.borrow().find(name)?;
        self.records.borrow().find(sym)
    }

    pub fn make_record(&self, type_id: RecordTypeId, fields: &[(&str, Value)]) -> Option<Value> {
        let mut slots = {
            let records = self.records.borrow();
            let ty = records.get(type_id)?;
            vec![Value::Nil; ty.fields.len()]
        };
        for (fname, value) in fields {
            let sym = self.symbols.borrow().find(fname)?;
            let idx = self.records.borrow().field_index(type_id, sym)?;
            slots[idx] = value.clone();
        }
        Some(Value::Record(Rc::new(RecordInstance { type_id, slots })))
    }

    pub fn slot_value(&self, value: &Value, field: &str) -> Option<Value> {
        let inst = match value {
            Value::Record(inst) => inst.clone(),
            _ => return None,
        };
        let sym = self.symbols.borrow().find(field)?;
        let idx = self.records.borrow().field_index(inst.type_id, sym)?;
        inst.slots.get(idx).cloned()
    }

    pub fn record_ancestry(&self, type_id: RecordTypeId) -> Vec<RecordTypeId> {
        self.records.borrow().ancestry(type_id)
    }

    // ----- interned specializer literals -----

    pub fn eql_literal_index(&self, value: &Value) -> Option<u32> {
        self.literals.borrow().eql_index(value)
    }

    pub fn eql_literal(&self, index: u32) -> Option<Value> {
        self.literals.borrow().eql_literal(index)
    }

    pub fn head_literal_index(&self, value: &Value) -> Option<u32> {
        self.literals.borrow().head_index(value)
    }

    pub fn head_literal(&self, index: u32) -> Option<Value> {
        self.literals.borrow().head_literal(index)
    }

    fn intern_literals(&self, spec: &Specializer) {
        match spec {
            Specializer::Eql(v) => {
                self.literals.borrow_mut().intern_eql(v);
            }
            Specializer::Head(v) => {
                self.literals.borrow_mut().intern_head(v);
            }
            _ => {}
        }
    }

    // ----- context values -----

    pub fn set_context(&self, name: &str, value: Value) {
        let sym = self.intern(name);
        self.context.borrow_mut().insert(sym, value);
    }

    pub fn clear_context(&self, name: &str) {
        let sym = self.symbols.borrow().find(name);
        if let Some(sym) = sym {
            self.context.borrow_mut().remove(&sym);
        }
    }

    pub fn context_value(&self, sym: SymbolId) -> Option<Value> {
        self.context.borrow().get(&sym).cloned()
    }

    // ----- extension registration (definition events) -----

    pub fn register_generalizer_resolver(&mut self, resolver: Rc<dyn GeneralizerResolver>) {
        self.registry.borrow_mut().register(resolver);
        self.flush_caches();
    }

    pub fn register_combination(&mut self, strategy: Rc<dyn CombinationStrategy>) {
        {
            let mut combos = self.combinations.borrow_mut();
            combos.push(strategy);
            combos.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        }
        self.flush_caches();
    }

    // ----- definition interface -----

    pub fn define_generic(
        &mut self,
        name: &str,
        params: &[&str],
        options: GenericOptions,
    ) -> Result<GenericId, DispatchError> {
        let name_sym = self.intern(name);
        let param_syms: Vec<SymbolId> = params.iter().map(|p| self.intern(p)).collect();

        // Precedence must be a permutation of the mandatory parameters.
        let precedence = match &options.precedence {
            None => None,
            Some(order) => {
                let mut indices: Vec<usize> = Vec::with_capacity(order.len());
                for pname in order {
                    let psym = self.intern(pname);
                    match param_syms.iter().position(|s| *s == psym) {
                        Some(i) if !indices.contains(&i) => indices.push(i),
                        _ => {
                            return Err(DispatchError::InvalidPrecedence {
                                generic: name.to_string(),
                                parameter: pname.clone(),
                            })
                        }
                    }
                }
                if indices.len() != param_syms.len() {
                    let missing = (0..param_syms.len())
                        .find(|i| !indices.contains(i))
                        .unwrap_or(0);
                    return Err(DispatchError::InvalidPrecedence {
                        generic: name.to_string(),
                        parameter: params.get(missing).unwrap_or(&"?").to_string(),
                    });
                }
                Some(indices)
            }
        };

        let gid = self.ensure_generic(name_sym, name, params.len());
        {
            let mut generics = self.generics.borrow_mut();
            let g = &mut generics[gid.0 as usize];
            g.params = param_syms;
            g.documentation = options.documentation.clone();
            g.precedence = precedence;
        }
        self.rebuild(gid);
        debug!(generic = %name, "defined generic function");
        Ok(gid)
    }

    pub fn define_method(
        &mut self,
        name: &str,
        qualifiers: &[Qualifier],
        specializers: &[Specializer],
        uses_next_method: bool,
        body: MethodBody,
    ) -> Result<MethodId, DispatchError> {
        self.define_method_with_context(name, qualifiers, specializers, &[], uses_next_method, body)
    }

    pub fn define_method_with_context(
        &mut self,
        name: &str,
        qualifiers: &[Qualifier],
        specializers: &[Specializer],
        context: &[(&str, Specializer)],
        uses_next_method: bool,
        body: MethodBody,
    ) -> Result<MethodId, DispatchError> {
        let name_sym = self.intern(name);
        let gid = self.ensure_generic(name_sym, name, specializers.len());

        let context: Vec<(SymbolId, Specializer)> = context
            .iter()
            .map(|(n, s)| (self.intern(n), s.clone()))
            .collect();

        // Intern declared literals so tag extraction stays O(1) and
        // bounded to literals that have ever been declared.
        for spec in specializers.iter().chain(context.iter().map(|(_, s)| s)) {
            self.intern_literals(spec);
        }

        // Resolve generalizers per dispatched position.
        let mut merges: Vec<(DispatchKey, Vec<Rc<dyn Generalizer>>)> = Vec::new();
        {
            let registry = self.registry.borrow();
            for (i, spec) in specializers.iter().enumerate() {
                if spec.is_universal() {
                    continue;
                }
                merges.push((DispatchKey::Arg(i), registry.resolve(spec)));
            }
            for (sym, spec) in &context {
                if spec.is_universal() {
                    continue;
                }
                merges.push((DispatchKey::Context(*sym), registry.resolve(spec)));
            }
        }
        let universal = self.registry.borrow().universal();

        let id = MethodId(self.next_method_id.get());
        self.next_method_id.set(id.0 + 1);
        let method = Rc::new(Method {
            id,
            specializers: specializers.to_vec(),
            context,
            qualifiers: qualifiers.to_vec(),
            uses_next_method,
            body,
        });

        {
            let mut generics = self.generics.borrow_mut();
            let g = &mut generics[gid.0 as usize];
            for (key, gens) in merges {
                g.axis_mut(key, universal.clone()).merge(gens);
            }
            let replaced = g.find_method(&method.specializers, &method.context, &method.qualifiers);
            if let Some(pos) = replaced {
                g.methods.remove(pos);
            }
            g.methods.push(method);
            debug!(
                generic = %name,
                method = id.0,
                replaced = replaced.is_some(),
                "defined method"
            );
        }

        self.rebuild(gid);
        Ok(id)
    }

    /// Remove a method by identity key. Returns whether one existed.
    pub fn undefine_method(
        &mut self,
        name: &str,
        qualifiers: &[Qualifier],
        specializers: &[Specializer],
    ) -> bool {
        let gid = match self.lookup(name) {
            Some(gid) => gid,
            None => return false,
        };
        let removed = {
            let mut generics = self.generics.borrow_mut();
            let g = &mut generics[gid.0 as usize];
            match g.find_method(specializers, &[], qualifiers) {
                Some(pos) => {
                    g.methods.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.rebuild(gid);
            debug!(generic = %name, "removed method");
        }
        removed
    }

    /// The sole mutator of installed entry points: re-sort axes,
    /// install a fresh entry, and reclaim the generic's memo entries.
    pub fn rebuild_generic(&mut self, name: &str) -> Result<(), DispatchError> {
        let gid = self.lookup(name).ok_or_else(|| DispatchError::UnknownGeneric {
            name: name.to_string(),
        })?;
        self.rebuild(gid);
        Ok(())
    }

    // ----- invocation -----

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, DispatchError> {
        let gid = self.lookup(name).ok_or_else(|| DispatchError::UnknownGeneric {
            name: name.to_string(),
        })?;
        self.call_generic(gid, args)
    }

    fn call_generic(&self, gid: GenericId, args: &[Value]) -> Result<Value, DispatchError> {
        let entry = self.generics.borrow()[gid.0 as usize].entry.clone();
        match &*entry {
            EntryPoint::Direct { methods, combined } => {
                let ready = combined.borrow().clone();
                let f = match ready {
                    Some(f) => f,
                    None => {
                        let name = self.generics.borrow()[gid.0 as usize].display_name.clone();
                        let built = self.combined_for(gid, &name, methods)?;
                        *combined.borrow_mut() = Some(built.clone());
                        built
                    }
                };
                f(self, args)
            }
            EntryPoint::Chain(dispatcher) => dispatcher.dispatch(self, args),
        }
    }

    // ----- introspection -----

    pub fn generic_methods(&self, name: &str) -> Vec<MethodInfo> {
        let gid = match self.lookup(name) {
            Some(gid) => gid,
            None => return Vec::new(),
        };
        let generics = self.generics.borrow();
        generics[gid.0 as usize]
            .methods
            .iter()
            .map(|m| MethodInfo {
                qualifiers: m.qualifiers.clone(),
                specializers: m.specializers.clone(),
                context: m.context.clone(),
                uses_next_method: m.uses_next_method,
            })
            .collect()
    }

    pub fn describe_generic(&self, name: &str) -> Option<String> {
        let gid = self.lookup(name)?;
        let generics = self.generics.borrow();
        let g = &generics[gid.0 as usize];
        let params: Vec<String> = {
            let symbols = self.symbols.borrow();
            g.params.iter().map(|p| symbols.name(*p).to_string()).collect()
        };
        let mut out = format!("generic {} ({})\n", g.display_name, params.join(" "));
        if let Some(doc) = &g.documentation {
            out.push_str(&format!("  {}\n", doc));
        }
        for m in &g.methods {
            let specs: Vec<String> = m
                .specializers
                .iter()
                .map(|s| self.describe_specializer(s))
                .collect();
            let quals = format_qualifiers(&m.qualifiers);
            if quals.is_empty() {
                out.push_str(&format!("  method ({})\n", specs.join(" ")));
            } else {
                out.push_str(&format!("  method [{}] ({})\n", quals, specs.join(" ")));
            }
        }
        Some(out)
    }

    pub fn describe_specializer(&self, spec: &Specializer) -> String {
        match spec {
            Specializer::Universal => "t".to_string(),
            Specializer::Eql(v) => format!("(eql {})", self.format_value(v)),
            Specializer::Head(v) => format!("(head {})", self.format_value(v)),
            Specializer::Type(tid) => {
                let records = self.records.borrow();
                let symbols = self.symbols.borrow();
                records
                    .get(*tid)
                    .map(|t| symbols.name(t.name).to_string())
                    .unwrap_or_else(|| "#<record>".to_string())
            }
            Specializer::Builtin(t) => t.name().to_string(),
            Specializer::Custom(k) => format!("(custom {})", k.kind_name()),
        }
    }

    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::BigInt(b) => b.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => format!("{:?}", s),
            Value::Symbol(sym) => self.symbol_name(*sym),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.format_value(v)).collect();
                format!("({})", inner.join(" "))
            }
            Value::Record(inst) => {
                let records = self.records.borrow();
                let symbols = self.symbols.borrow();
                let name = records
                    .get(inst.type_id)
                    .map(|t| symbols.name(t.name).to_string())
                    .unwrap_or_else(|| "record".to_string());
                format!("#<{}>", name)
            }
        }
    }

    pub fn format_args(&self, args: &[Value]) -> String {
        let parts: Vec<String> = args.iter().map(|v| self.format_value(v)).collect();
        parts.join(" ")
    }

    // ----- caches & instrumentation -----

    /// Discard all derived dispatch state. Behavior is unchanged; only
    /// the instrumentation counters observe the flush.
    pub fn clear_caches(&mut self) {
        self.flush_caches();
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub(crate) fn stats(&self) -> &StatCells {
        &self.stats
    }

    // ----- internals -----

    fn lookup(&self, name: &str) -> Option<GenericId> {
        let sym = self.symbols.borrow().find(name)?;
        self.generic_names.borrow().get(&sym).copied()
    }

    fn ensure_generic(&self, name_sym: SymbolId, display_name: &str, arity: usize) -> GenericId {
        let existing = self.generic_names.borrow().get(&name_sym).copied();
        if let Some(gid) = existing {
            let mut generics = self.generics.borrow_mut();
            let g = &mut generics[gid.0 as usize];
            while g.params.len() < arity {
                let sym = self
                    .symbols
                    .borrow_mut()
                    .intern(&format!("arg{}", g.params.len()));
                g.params.push(sym);
            }
            return gid;
        }
        let params: Vec<SymbolId> = (0..arity)
            .map(|i| self.symbols.borrow_mut().intern(&format!("arg{}", i)))
            .collect();
        let gid = GenericId(self.generics.borrow().len() as u32);
        self.generics
            .borrow_mut()
            .push(GenericFunction::new(name_sym, Rc::from(display_name), params));
        self.generic_names.borrow_mut().insert(name_sym, gid);
        debug!(generic = %display_name, "created generic function");
        gid
    }

    fn rebuild(&self, gid: GenericId) {
        {
            let mut generics = self.generics.borrow_mut();
            let g = &mut generics[gid.0 as usize];
            g.sort_axes();
            g.rebuild_entry(gid);
        }
        // Reclaim the generic's stale memo entries. Correctness does
        // not depend on this: replaced methods keep their ids out of
        // any future key.
        self.combined_memo
            .borrow_mut()
            .retain(|k, _| k.generic != gid);
        self.dispatchers.borrow_mut().retain(|k, _| k.generic != gid);
        self.stats.record_entry_rebuild();
    }

    fn flush_caches(&self) {
        self.combined_memo.borrow_mut().clear();
        self.dispatchers.borrow_mut().clear();
        let count = self.generics.borrow().len();
        for i in 0..count {
            let gid = GenericId(i as u32);
            let mut generics = self.generics.borrow_mut();
            generics[i].rebuild_entry(gid);
        }
    }

    /// The globally memoized tag-table dispatcher for one
    /// (generic, position, method subset).
    pub(crate) fn dispatcher_for(
        &self,
        generic: GenericId,
        name: &Rc<str>,
        order: Rc<Vec<DispatchAxis>>,
        position: usize,
        methods: Vec<Rc<Method>>,
    ) -> Rc<Dispatcher> {
        let key = DispatcherKey {
            generic,
            position,
            methods: methods.iter().map(|m| m.id).collect(),
        };
        let existing = self.dispatchers.borrow().get(&key).cloned();
        if let Some(d) = existing {
            return d;
        }
        let built = Rc::new(Dispatcher::new(generic, name.clone(), order, position, methods));
        self.dispatchers.borrow_mut().insert(key, built.clone());
        built
    }

    /// The memoized combined method for one (generic, method list),
    /// guarded by the under-construction sentinel.
    pub(crate) fn combined_for(
        &self,
        generic: GenericId,
        name: &Rc<str>,
        methods: &[Rc<Method>],
    ) -> Result<Combined, DispatchError> {
        let key = CombinedKey {
            generic,
            methods: methods.iter().map(|m| m.id).collect(),
        };
        {
            let memo = self.combined_memo.borrow();
            match memo.get(&key) {
                Some(CombinedEntry::Ready(c)) => return Ok(c.clone()),
                Some(CombinedEntry::Building) => {
                    return Err(DispatchError::CyclicDefinition {
                        generic: name.to_string(),
                    })
                }
                None => {}
            }
        }
        self.combined_memo
            .borrow_mut()
            .insert(key.clone(), CombinedEntry::Building);

        let strategies: Vec<Rc<dyn CombinationStrategy>> = self.combinations.borrow().clone();
        let mut outcome: Option<Result<Combined, DispatchError>> = None;
        for strategy in &strategies {
            if let Some(result) = strategy.combine(self, name.as_ref(), methods) {
                trace!(generic = %name, strategy = strategy.name(), "building combined method");
                outcome = Some(result);
                break;
            }
        }
        let outcome = outcome.unwrap_or_else(|| build_standard(name.as_ref(), methods));

        match outcome {
            Ok(combined) => {
                self.combined_memo
                    .borrow_mut()
                    .insert(key, CombinedEntry::Ready(combined.clone()));
                self.stats.record_combined_build();
                Ok(combined)
            }
            Err(err) => {
                self.combined_memo.borrow_mut().remove(&key);
                Err(err)
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_generic() {
        let engine = Engine::new();
        let err = engine.call("nope", &[]).unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnknownGeneric {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_define_and_call_single_method() {
        let mut engine = Engine::new();
        engine
            .define_method(
                "double",
                &[],
                &[Specializer::Builtin(crate::value::TypeTag::Integer)],
                false,
                Rc::new(
                    |_: &Engine, _: &crate::combine::NextMethod, args: &[Value]| {
                        match args.first() {
                            Some(Value::Integer(n)) => Ok(Value::Integer(n * 2)),
                            _ => Ok(Value::Nil),
                        }
                    },
                ),
            )
            .unwrap();
        let result = engine.call("double", &[Value::Integer(21)]).unwrap();
        assert!(result.eql(&Value::Integer(42)));
    }

    #[test]
    fn test_invalid_precedence_rejected_at_definition() {
        let mut engine = Engine::new();
        let err = engine
            .define_generic(
                "resize",
                &["shape", "factor"],
                GenericOptions {
                    documentation: None,
                    precedence: Some(vec!["factor".to_string(), "scale".to_string()]),
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidPrecedence {
                generic: "resize".to_string(),
                parameter: "scale".to_string()
            }
        );

        // Not a permutation: a mandatory parameter is missing.
        let err = engine
            .define_generic(
                "resize",
                &["shape", "factor"],
                GenericOptions {
                    documentation: None,
                    precedence: Some(vec!["factor".to_string()]),
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidPrecedence {
                generic: "resize".to_string(),
                parameter: "shape".to_string()
            }
        );
    }

    #[test]
    fn test_format_values() {
        let engine = Engine::new();
        let sym = engine.intern("hello");
        assert_eq!(engine.format_value(&Value::Symbol(sym)), "hello");
        assert_eq!(
            engine.format_value(&Value::list(vec![Value::Integer(1), Value::Nil])),
            "(1 nil)"
        );
    }
}
