//! Column buffers: host memory bound to result columns or statement parameters.
//!
//! Every buffer owns its storage and length indicator at a stable heap address, knows the flags
//! and SQL type properties of the column it stands for, and keeps track of the statements it is
//! bound to. Buffer and statement notify each other when either is dropped, so neither the
//! driver ends up with pointers into freed buffers nor buffers with references to freed
//! statements.

pub(crate) mod bind;
mod binary;
mod column_buffer;
mod indicator;
mod numeric;
mod pointer;
mod scalar;
mod text;

pub use self::{
    binary::BinaryBuffer,
    column_buffer::{BufferKind, ColumnBuffer, ColumnFlags, ColumnProperties},
    indicator::LengthIndicator,
    numeric::NumericBuffer,
    pointer::PointerBuffer,
    scalar::{CFixed, ScalarBuffer},
    text::{TextBuffer, WTextBuffer},
};
