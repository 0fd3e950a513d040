pub mod control;
pub mod loader;
pub mod progress;
pub mod store;
pub mod types;

pub use control::*;
pub use loader::{parse_file, parse_reader, write_file, write_table, LoadedTable};
pub use progress::*;
pub use store::*;
pub use types::*;
