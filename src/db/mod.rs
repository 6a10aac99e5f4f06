pub mod store;

pub use store::{MonitorRow, SignalStore};
