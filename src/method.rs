// PolyCL Methods
//
// One implementation of a generic function: per-position specializers,
// a qualifier list naming its combination role, and the body callable.

use std::fmt;
use std::rc::Rc;

use crate::combine::NextMethod;
use crate::engine::Engine;
use crate::error::DispatchError;
use crate::generic::DispatchKey;
use crate::specializer::Specializer;
use crate::symbol::SymbolId;
use crate::value::Value;

/// Unique identifier for a method. Every definition mints a fresh id;
/// replacing a method unlinks the old id, which is what keeps stale
/// dispatch-cache keys from ever resurrecting an old body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

/// One atom of a method's qualifier list.
///
/// The standard combination understands `[role?] (Extra Word)*`; other
/// shapes are carried verbatim for custom combination strategies and
/// rejected only when the standard combination has to interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    Before,
    After,
    Around,
    Extra,
    Word(String),
}

impl Qualifier {
    pub fn word(s: &str) -> Qualifier {
        Qualifier::Word(s.to_string())
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Before => write!(f, ":before"),
            Qualifier::After => write!(f, ":after"),
            Qualifier::Around => write!(f, ":around"),
            Qualifier::Extra => write!(f, ":extra"),
            Qualifier::Word(w) => write!(f, "{}", w),
        }
    }
}

pub fn format_qualifiers(quals: &[Qualifier]) -> String {
    quals
        .iter()
        .map(|q| q.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A method's role under the standard combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Before,
    After,
    Around,
}

/// Parse a qualifier list as the standard combination reads it:
/// an optional role atom followed by any number of `:extra <tag>`
/// pairs. Returns None for any other shape.
pub fn parse_standard_qualifiers(quals: &[Qualifier]) -> Option<Role> {
    let mut rest = quals;
    let role = match rest.first() {
        Some(Qualifier::Before) => {
            rest = &rest[1..];
            Role::Before
        }
        Some(Qualifier::After) => {
            rest = &rest[1..];
            Role::After
        }
        Some(Qualifier::Around) => {
            rest = &rest[1..];
            Role::Around
        }
        _ => Role::Primary,
    };
    loop {
        match rest {
            [] => return Some(role),
            [Qualifier::Extra, Qualifier::Word(_), tail @ ..] => rest = tail,
            _ => return None,
        }
    }
}

/// A method body. Receives the engine (for re-entrant generic calls),
/// the next-method continuation, and the argument list.
pub type MethodBody =
    Rc<dyn Fn(&Engine, &NextMethod, &[Value]) -> Result<Value, DispatchError>>;

/// One method of a generic function.
#[derive(Clone)]
pub struct Method {
    pub id: MethodId,
    /// Positional specializers, one per dispatched parameter in
    /// declaration order. Positions beyond the list are universal.
    pub specializers: Vec<Specializer>,
    /// Context-expression specializers.
    pub context: Vec<(SymbolId, Specializer)>,
    pub qualifiers: Vec<Qualifier>,
    pub uses_next_method: bool,
    pub body: MethodBody,
}

impl Method {
    /// The specializer this method declares at a dispatch key.
    pub fn specializer_at(&self, key: &DispatchKey) -> Specializer {
        match key {
            DispatchKey::Arg(i) => self
                .specializers
                .get(*i)
                .cloned()
                .unwrap_or(Specializer::Universal),
            DispatchKey::Context(sym) => self
                .context
                .iter()
                .find(|(s, _)| s == sym)
                .map(|(_, spec)| spec.clone())
                .unwrap_or(Specializer::Universal),
        }
    }

    /// Replace-on-redefine identity: specializer list (positional and
    /// context) plus the full qualifier list, `:extra` tags included.
    pub fn same_identity(
        &self,
        specializers: &[Specializer],
        context: &[(SymbolId, Specializer)],
        qualifiers: &[Qualifier],
    ) -> bool {
        self.specializers == specializers
            && self.context == context
            && self.qualifiers == qualifiers
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("specializers", &self.specializers)
            .field("qualifiers", &self.qualifiers)
            .field("uses_next_method", &self.uses_next_method)
            .finish()
    }
}
