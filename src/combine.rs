// PolyCL Effective-Method Builder
//
// Folds the filtered, specificity-sorted method list of one call into
// a single callable. The standard combination implements the
// around/before/primary/after protocol with next-method chaining; the
// CombinationStrategy registry is the extension hook for alternative
// combination policies.

use std::rc::Rc;

use crate::engine::Engine;
use crate::error::DispatchError;
use crate::method::{format_qualifiers, parse_standard_qualifiers, Method, Role};
use crate::value::Value;

/// The effective method: one callable per (generic, method list).
pub type Combined = Rc<dyn Fn(&Engine, &[Value]) -> Result<Value, DispatchError>>;

/// The continuation handed to a method body.
///
/// Invoking it with no arguments re-applies the argument list the
/// current method received; invoking it with arguments overrides them
/// for the rest of the chain. Past the end of the chain it signals
/// no-next-method at the point of invocation.
pub struct NextMethod {
    generic: Rc<str>,
    next: Option<Combined>,
    original: Vec<Value>,
}

impl NextMethod {
    pub(crate) fn new(generic: Rc<str>, next: Option<Combined>, args: &[Value]) -> Self {
        Self {
            generic,
            next,
            original: args.to_vec(),
        }
    }

    /// A continuation with nothing to continue to; invoking it signals
    /// no-next-method. Custom combination strategies hand this to
    /// bodies that must not chain.
    pub fn inert(generic: &str, args: &[Value]) -> Self {
        Self::new(Rc::from(generic), None, args)
    }

    /// A continuation bound to an explicit callable.
    pub fn chained(generic: &str, next: Combined, args: &[Value]) -> Self {
        Self::new(Rc::from(generic), Some(next), args)
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Continue with the original argument list.
    pub fn call(&self, engine: &Engine) -> Result<Value, DispatchError> {
        match &self.next {
            Some(f) => f(engine, &self.original),
            None => Err(DispatchError::NoNextMethod {
                generic: self.generic.to_string(),
            }),
        }
    }

    /// Continue with an explicit argument list.
    pub fn call_with(&self, engine: &Engine, args: &[Value]) -> Result<Value, DispatchError> {
        match &self.next {
            Some(f) => f(engine, args),
            None => Err(DispatchError::NoNextMethod {
                generic: self.generic.to_string(),
            }),
        }
    }
}

/// A combination policy. Strategies are consulted highest priority
/// first; returning None declines the (generic, method list) pair.
/// The standard combination sits at priority 0 and never declines.
pub trait CombinationStrategy {
    fn name(&self) -> &'static str;
    fn priority(&self) -> i32;
    fn combine(
        &self,
        engine: &Engine,
        generic: &str,
        methods: &[Rc<Method>],
    ) -> Option<Result<Combined, DispatchError>>;
}

pub struct StandardCombination;

impl CombinationStrategy for StandardCombination {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn combine(
        &self,
        _engine: &Engine,
        generic: &str,
        methods: &[Rc<Method>],
    ) -> Option<Result<Combined, DispatchError>> {
        Some(build_standard(generic, methods))
    }
}

/// One link of a chain: binds the method body to its continuation.
/// A method declared without uses-next-method gets an inert
/// continuation even mid-chain; deeper links are reachable only
/// through continuations, so such a method terminates its chain.
fn chain_link(generic: &Rc<str>, method: &Rc<Method>, next: Option<Combined>) -> Combined {
    let g = generic.clone();
    let body = method.body.clone();
    let uses = method.uses_next_method;
    Rc::new(move |engine: &Engine, args: &[Value]| {
        let continuation = if uses { next.clone() } else { None };
        let nm = NextMethod::new(g.clone(), continuation, args);
        (body)(engine, &nm, args)
    })
}

/// Fold methods right-to-left so the most specific becomes the
/// outermost link.
fn fold_chain(generic: &Rc<str>, methods: &[Rc<Method>]) -> Option<Combined> {
    let mut link: Option<Combined> = None;
    for m in methods.iter().rev() {
        link = Some(chain_link(generic, m, link));
    }
    link
}

fn no_applicable_raiser(generic: &Rc<str>) -> Combined {
    let g = generic.clone();
    Rc::new(move |engine: &Engine, args: &[Value]| {
        Err(DispatchError::NoApplicableMethod {
            generic: g.to_string(),
            args: engine.format_args(args),
        })
    })
}

fn no_primary_raiser(generic: &Rc<str>) -> Combined {
    let g = generic.clone();
    Rc::new(move |engine: &Engine, args: &[Value]| {
        Err(DispatchError::NoPrimaryMethod {
            generic: g.to_string(),
            args: engine.format_args(args),
        })
    })
}

/// The standard combination over a most-specific-first method list.
///
/// An empty or primary-less list still produces a callable; the
/// corresponding signal carries the live argument list, which only
/// exists at the call.
pub(crate) fn build_standard(
    generic: &str,
    methods: &[Rc<Method>],
) -> Result<Combined, DispatchError> {
    let gname: Rc<str> = Rc::from(generic);

    if methods.is_empty() {
        return Ok(no_applicable_raiser(&gname));
    }

    let mut primaries: Vec<Rc<Method>> = Vec::new();
    let mut befores: Vec<Rc<Method>> = Vec::new();
    let mut afters: Vec<Rc<Method>> = Vec::new();
    let mut arounds: Vec<Rc<Method>> = Vec::new();

    for m in methods {
        match parse_standard_qualifiers(&m.qualifiers) {
            Some(Role::Primary) => primaries.push(m.clone()),
            Some(Role::Before) => befores.push(m.clone()),
            Some(Role::After) => afters.push(m.clone()),
            Some(Role::Around) => arounds.push(m.clone()),
            None => {
                return Err(DispatchError::UnsupportedQualifiers {
                    generic: generic.to_string(),
                    qualifiers: format_qualifiers(&m.qualifiers),
                })
            }
        }
    }

    if primaries.is_empty() {
        return Ok(no_primary_raiser(&gname));
    }

    let primary_chain = match fold_chain(&gname, &primaries) {
        Some(chain) => chain,
        None => return Ok(no_applicable_raiser(&gname)),
    };

    // Befores run most specific first, afters least specific first;
    // both discard their results and cannot chain.
    let core: Combined = if befores.is_empty() && afters.is_empty() {
        primary_chain
    } else {
        let g = gname.clone();
        let afters_rev: Vec<Rc<Method>> = afters.into_iter().rev().collect();
        Rc::new(move |engine: &Engine, args: &[Value]| {
            for m in &befores {
                let nm = NextMethod::new(g.clone(), None, args);
                (m.body)(engine, &nm, args)?;
            }
            let result = (primary_chain)(engine, args)?;
            for m in &afters_rev {
                let nm = NextMethod::new(g.clone(), None, args);
                (m.body)(engine, &nm, args)?;
            }
            Ok(result)
        })
    };

    let mut wrapped = core;
    for m in arounds.iter().rev() {
        wrapped = chain_link(&gname, m, Some(wrapped));
    }

    Ok(wrapped)
}
