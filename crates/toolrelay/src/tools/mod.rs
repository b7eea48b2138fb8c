//! The tools of the order support demo.

mod delivery_date;
mod find_order;

pub use delivery_date::{DeliveryDateTool, DeliveryEstimate};
pub use find_order::{FindOrderOutput, FindOrderTool};
