//! Domain types: batches, list roles and list documents

pub mod batch;
pub mod list;

pub use batch::{Batch, BatchStatus, ClassifiedItems, Element, ElementKind, UpdateKind};
pub use list::{
    ListDocument, ListKind, ListParams, ListPolarity, ListRole, ListUpdate, PatchOp,
    PatchOperation,
};
