// PolyCL Record Types
//
// Nominal structured record types with single-parent inheritance.
// Instances carry their type id as the dispatch witness; the ancestor
// chain orders nominal-type specializers most specific first.

use std::collections::HashMap;

use crate::symbol::SymbolId;
use crate::value::Value;

/// Unique identifier for a record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordTypeId(pub u32);

/// A record type definition
#[derive(Debug, Clone)]
pub struct RecordType {
    pub name: SymbolId,
    pub parent: Option<RecordTypeId>,
    /// Effective fields: inherited first, then direct (shadowing by name).
    pub fields: Vec<SymbolId>,
}

/// The engine-wide record type registry
#[derive(Debug, Default)]
pub struct RecordRegistry {
    types: Vec<RecordType>,
    by_name: HashMap<SymbolId, RecordTypeId>,
}

/// An instance of a record type
#[derive(Debug)]
pub struct RecordInstance {
    pub type_id: RecordTypeId,
    pub slots: Vec<Value>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or redefine a record type. Redefinition keeps the id so
    /// existing instances stay attached to the name.
    pub fn define(
        &mut self,
        name: SymbolId,
        parent: Option<RecordTypeId>,
        direct_fields: Vec<SymbolId>,
    ) -> RecordTypeId {
        let mut fields: Vec<SymbolId> = parent
            .and_then(|p| self.types.get(p.0 as usize))
            .map(|p| p.fields.clone())
            .unwrap_or_default();
        for f in direct_fields {
            if !fields.contains(&f) {
                fields.push(f);
            }
        }

        if let Some(&id) = self.by_name.get(&name) {
            self.types[id.0 as usize] = RecordType { name, parent, fields };
            return id;
        }
        let id = RecordTypeId(self.types.len() as u32);
        self.types.push(RecordType { name, parent, fields });
        self.by_name.insert(name, id);
        id
    }

    pub fn get(&self, id: RecordTypeId) -> Option<&RecordType> {
        self.types.get(id.0 as usize)
    }

    pub fn find(&self, name: SymbolId) -> Option<RecordTypeId> {
        self.by_name.get(&name).copied()
    }

    /// The type and its ancestors, most specific first.
    pub fn ancestry(&self, id: RecordTypeId) -> Vec<RecordTypeId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(tid) = cursor {
            if chain.contains(&tid) {
                break;
            }
            chain.push(tid);
            cursor = self.get(tid).and_then(|t| t.parent);
        }
        chain
    }

    pub fn is_subtype(&self, child: RecordTypeId, parent: RecordTypeId) -> bool {
        self.ancestry(child).contains(&parent)
    }

    /// Index of a field in the effective slot layout.
    pub fn field_index(&self, id: RecordTypeId, field: SymbolId) -> Option<usize> {
        self.get(id)?.fields.iter().position(|f| *f == field)
    }
}
