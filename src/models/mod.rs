pub mod item;
pub mod source;

pub use item::{DeliveryState, Entry, Item};
pub use source::{Source, SourceView};
