mod sync_cell;

pub use sync_cell::SyncRefCell;
