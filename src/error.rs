use thiserror::Error;

use crate::arch::Vip;

/// The generic error type covering every recoverable failure this library
/// can return.
///
/// Only genuinely recoverable conditions are represented here. Malformed IR
/// is a bug in the producing front-end and is reported through assertions,
/// and analysis limits hit by the symbolic machine are ordinary
/// [`crate::symex::ExitReason`] values that passes treat as barriers.
#[derive(Error, Debug)]
pub enum Error {
    /// No basic block is keyed by the given virtual instruction pointer.
    #[error("no block is keyed by vip {0:#x}")]
    UnknownBlock(Vip),

    /// A block could not be deleted because other blocks still link to it.
    #[error("block {0:#x} still has edges and cannot be deleted")]
    BlockLinked(Vip),

    /// The routine has no entry point assigned.
    #[error("the routine has no entry point")]
    NoEntryPoint,

    /// An expression was expected to fold to a concrete value but did not.
    ///
    /// Raised by the validation harness when an observable value (a branch
    /// condition, a call parameter, an exit register) depends on state the
    /// harness did not seed.
    #[error("expression does not evaluate to a concrete value: {0}")]
    NotConcrete(String),

    /// Concrete execution exceeded the configured step limit.
    ///
    /// Guards the validation harness against routines that fail to
    /// terminate on the chosen inputs.
    #[error("execution exceeded the step limit of {0} instructions")]
    StepLimit(usize),

    /// Generic validation failure with a descriptive message.
    #[error("{0}")]
    Validation(String),
}
