// PolyCL: Multiple-Dispatch Generic Function Engine
//
// Methods tagged with per-argument specializers and combination
// qualifiers are selected, ordered, and folded into one callable per
// concrete argument shape; the selection is cached by argument tag so
// structurally-similar calls skip re-resolution.

pub mod cache;
pub mod combine;
pub mod engine;
pub mod error;
pub mod generalizer;
pub mod generic;
pub mod method;
pub mod records;
pub mod specializer;
pub mod symbol;
pub mod value;
