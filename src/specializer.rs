// PolyCL Specializers
//
// A specializer constrains one dispatched position of a method.
// Specializers compare by structural equality, not identity; the
// Custom variant keeps the set of kinds open for third parties.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::records::RecordTypeId;
use crate::value::{TypeTag, Value};

/// An extension specializer kind.
///
/// Implementations supply structural equality within their own kind;
/// the matching semantics live in the generalizer registered for the
/// kind, not here.
pub trait SpecializerKind: fmt::Debug {
    /// Stable key naming the kind; two specializers can only be equal
    /// when their kinds share this key.
    fn kind_name(&self) -> &'static str;
    /// Structural equality against another specializer of any kind.
    fn matches(&self, other: &dyn SpecializerKind) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// A constraint on one dispatched argument or context position.
#[derive(Debug, Clone)]
pub enum Specializer {
    /// Matches everything; the implicit specializer of unlisted positions.
    Universal,
    /// Matches values `eql` to the carried literal.
    Eql(Value),
    /// Matches non-empty lists whose first element is `eql` to the literal.
    Head(Value),
    /// Matches record instances of the type or any of its descendants.
    Type(RecordTypeId),
    /// Matches values of the builtin type class or its declared subtypes.
    Builtin(TypeTag),
    /// An extension kind.
    Custom(Rc<dyn SpecializerKind>),
}

impl Specializer {
    pub fn is_universal(&self) -> bool {
        matches!(self, Specializer::Universal)
    }
}

impl PartialEq for Specializer {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Specializer::Universal, Specializer::Universal) => true,
            (Specializer::Eql(a), Specializer::Eql(b)) => a.eql(b),
            (Specializer::Head(a), Specializer::Head(b)) => a.eql(b),
            (Specializer::Type(a), Specializer::Type(b)) => a == b,
            (Specializer::Builtin(a), Specializer::Builtin(b)) => a == b,
            (Specializer::Custom(a), Specializer::Custom(b)) => {
                a.kind_name() == b.kind_name() && a.matches(b.as_ref())
            }
            _ => false,
        }
    }
}
