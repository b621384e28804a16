// PolyCL Error Conditions
//
// Structured error signals raised by dispatch, combination, and
// definition events. None are retried internally; all propagate to the
// immediate caller.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No method's specializers matched the call.
    #[error("no applicable method for {generic} when called with ({args})")]
    NoApplicableMethod { generic: String, args: String },

    /// Before/after/around methods matched but no primary method did.
    #[error("no primary method for {generic} when called with ({args})")]
    NoPrimaryMethod { generic: String, args: String },

    /// A next-method continuation was invoked past the end of the chain.
    #[error("no next method in {generic}")]
    NoNextMethod { generic: String },

    /// Combined-method construction recursed into itself.
    #[error("combined method for {generic} depends on its own construction")]
    CyclicDefinition { generic: String },

    /// An argument precedence declaration named something that is not a
    /// mandatory parameter, or was not a permutation of them.
    #[error("invalid argument precedence for {generic}: {parameter}")]
    InvalidPrecedence { generic: String, parameter: String },

    /// The active combination strategy could not interpret a method's
    /// qualifier list.
    #[error("unsupported qualifier combination ({qualifiers}) on a method of {generic}")]
    UnsupportedQualifiers { generic: String, qualifiers: String },

    /// The invoked name has no generic function installed.
    #[error("{name} is not a generic function")]
    UnknownGeneric { name: String },
}
