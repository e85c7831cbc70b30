//! Bindless descriptor tables
//!
//! A bindless table is a fixed-capacity array of shader-addressable resource
//! bindings. Render and asset code registers resources once and receives a
//! plain integer index that per-object data or push constants can carry;
//! shaders index the array directly instead of rebinding per draw.
//!
//! Every slot is bound to something valid at all times — a caller-assigned
//! resource or the shared default — so a shader may read any index in
//! `[0, capacity)` without a branch. Unused and freed slots simply resolve to
//! the default resource.

pub mod sub;
pub mod table;
pub mod unified;

pub use sub::BindlessSubAllocation;
pub use table::{BindlessTable, TableSnapshot};
pub use unified::{BindingKind, BindingPlan, BufferRange, PlannedBinding, TableDesc, UnifiedTables};
