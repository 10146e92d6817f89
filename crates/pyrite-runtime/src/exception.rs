//! Python exception types raised by the runtime and the error values that
//! carry them between operations.
//!
//! Compiled code signals failure with a type-specific sentinel return while
//! the error itself is parked on the thread state (see [`crate::bridge`]).
//! Inside the runtime we use ordinary `Result` values; [`RunError`] is the
//! error half and [`SimpleException`] the payload.

use std::fmt::Display;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    heap::{ChildIds, Heap, HeapData, HeapId},
    value::Value,
};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Python exception types the runtime can originate or match against.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `ValueError` -> "ValueError").
///
/// This is the subset of CPython's hierarchy the runtime itself raises plus the
/// intermediate classes needed for `except` matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    /// Root of the hierarchy; catches everything.
    BaseException,
    /// Base class for all non-exiting exceptions.
    Exception,
    /// Raised into a generator when it is closed. Inherits from BaseException.
    GeneratorExit,
    /// Signals exhaustion of an iterator; may carry a return value.
    StopIteration,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    /// Subclass of ArithmeticError.
    OverflowError,
    /// Subclass of ArithmeticError.
    ZeroDivisionError,

    // --- LookupError hierarchy ---
    LookupError,
    /// Subclass of LookupError.
    IndexError,
    /// Subclass of LookupError.
    KeyError,

    // --- Standalone types ---
    AttributeError,
    MemoryError,
    NameError,
    RuntimeError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Implements the slice of Python's exception hierarchy the runtime deals
    /// with, for `except` matching:
    /// - `BaseException` catches everything
    /// - `Exception` catches everything except `BaseException` and `GeneratorExit`
    /// - `LookupError` is the base for `KeyError` and `IndexError`
    /// - `ArithmeticError` is the base for `ZeroDivisionError` and `OverflowError`
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::BaseException => true,
            Self::Exception => !matches!(self, Self::BaseException | Self::GeneratorExit),
            Self::LookupError => matches!(self, Self::KeyError | Self::IndexError),
            Self::ArithmeticError => matches!(self, Self::ZeroDivisionError | Self::OverflowError),
            _ => false,
        }
    }
}

/// An exception type together with its message, before it is materialized as
/// a heap object.
///
/// This is the form errors travel in through `RunResult` land. The bridge
/// turns it into an [`ExcInstance`] when it crosses into the pending-error
/// indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleException {
    exc_type: ExcType,
    message: Option<String>,
}

impl SimpleException {
    /// Creates an exception with no message (e.g., bare `StopIteration`).
    #[must_use]
    pub fn new(exc_type: ExcType) -> Self {
        Self { exc_type, message: None }
    }

    /// Creates an exception with a message.
    pub fn new_msg(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            message: Some(message.into()),
        }
    }

    /// Returns the exception type.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// Returns the message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Error type for runtime operations.
///
/// `Exc` is a Python-visible exception; `Fatal` is the abort path reserved
/// for allocation failure, surfaced as a panic at the outermost boundary
/// rather than a Python exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// A Python exception to be raised on the host thread.
    Exc(SimpleException),
    /// Unrecoverable failure; the process should terminate.
    Fatal(&'static str),
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(exc)
    }
}

impl ExcType {
    /// Creates a TypeError with the given message.
    pub(crate) fn type_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    /// Creates a ValueError with the given message.
    pub(crate) fn value_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::ValueError, msg).into()
    }

    /// Creates a RuntimeError with the given message.
    pub(crate) fn runtime_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::RuntimeError, msg).into()
    }

    /// Creates an IndexError with CPython's exact wording, e.g.
    /// `IndexError: list index out of range`.
    pub(crate) fn index_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::IndexError, msg).into()
    }

    /// Creates the OverflowError CPython raises when an index does not fit a
    /// machine word.
    pub(crate) fn overflow_ssize() -> RunError {
        SimpleException::new_msg(Self::OverflowError, "Python int too large to convert to C ssize_t").into()
    }

    /// Creates the ZeroDivisionError raised by `//` and `%`.
    pub(crate) fn zero_division() -> RunError {
        SimpleException::new_msg(Self::ZeroDivisionError, "integer division or modulo by zero").into()
    }

    /// Creates the RuntimeError for structural dict mutation mid-iteration.
    ///
    /// Matches CPython's format: `RuntimeError: dictionary changed size during iteration`
    pub(crate) fn dict_changed_size() -> RunError {
        SimpleException::new_msg(Self::RuntimeError, "dictionary changed size during iteration").into()
    }

    /// Creates an AttributeError naming the class and the undefined attribute.
    pub(crate) fn attribute_undefined(type_name: impl Display, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("attribute '{attr}' of '{type_name}' undefined"),
        )
        .into()
    }

    /// Creates the AttributeError for deleting a non-deletable attribute.
    pub(crate) fn attribute_undeletable(type_name: impl Display, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("'{type_name}' object attribute '{attr}' cannot be deleted"),
        )
        .into()
    }

    /// Creates an AttributeError for a missing attribute (lookup failure).
    pub(crate) fn attribute_error(type_name: impl Display, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
        .into()
    }
}

/// A materialized exception object living on the heap.
///
/// This is what a raised error looks like once it has crossed into the
/// thread's error indicator: a type, positional args (the message is args[0]
/// when present), and an optional traceback chain.
#[derive(Debug)]
pub struct ExcInstance {
    exc_type: ExcType,
    args: Vec<Value>,
    traceback: Option<HeapId>,
}

impl ExcInstance {
    /// Creates an exception instance with the given args.
    ///
    /// Takes ownership of the arg references; they are released when the
    /// instance is freed.
    #[must_use]
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        Self {
            exc_type,
            args,
            traceback: None,
        }
    }

    /// Materializes a [`SimpleException`], boxing its message as a str arg.
    pub fn from_simple(exc: &SimpleException, heap: &mut Heap) -> Self {
        let args = match exc.message() {
            Some(msg) => vec![Value::Ref(heap.allocate(HeapData::Str(msg.into())))],
            None => Vec::new(),
        };
        Self::new(exc.exc_type(), args)
    }

    /// Returns the exception type.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// Returns the positional args.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Returns the first positional arg, used as the `StopIteration` return
    /// value in `yield from` delegation.
    #[must_use]
    pub fn first_arg(&self) -> Option<&Value> {
        self.args.first()
    }

    /// Returns the head of the traceback chain, if one is attached.
    #[must_use]
    pub fn traceback(&self) -> Option<HeapId> {
        self.traceback
    }

    /// Replaces the traceback chain head, returning the previous one.
    ///
    /// The caller is responsible for the reference count of both the new and
    /// the returned id.
    pub fn set_traceback(&mut self, tb: Option<HeapId>) -> Option<HeapId> {
        std::mem::replace(&mut self.traceback, tb)
    }

    /// Collects owned heap references for recursive release.
    pub(crate) fn child_ids(&self, out: &mut ChildIds) {
        for arg in &self.args {
            if let Value::Ref(id) = arg {
                out.push(*id);
            }
        }
        if let Some(tb) = self.traceback {
            out.push(tb);
        }
    }
}
