//! Data model for work items and their priced line items

pub mod line_item;
pub mod money;
pub mod status;
pub mod work_item;

pub use line_item::{ItemKey, LineItem, OptionTier};
pub use money::{Money, TaxRate, Totals};
pub use status::{Queue, Status, UnknownStatus, FORWARD_PATH};
pub use work_item::{
    CustomerRef, LifecycleTimestamps, NewWorkItem, RecordKind, TenantId, WorkItem, WorkItemId,
};
