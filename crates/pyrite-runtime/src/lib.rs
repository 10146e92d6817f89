#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "tagged-word reinterpretation is intentional")]
#![expect(clippy::cast_possible_wrap, reason = "tagged-word reinterpretation is intentional")]

pub mod attrs;
pub mod bridge;
pub mod builder;
pub mod codec;
pub mod exception;
pub mod function;
pub mod heap;
pub mod intern;
mod py_hash;
pub mod runtime;
pub mod tagged;
pub mod types;
pub mod value;
pub mod vtable;

pub use crate::{
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{Heap, HeapData, HeapId, HeapStats},
    runtime::Runtime,
    tagged::TaggedInt,
    value::Value,
};
