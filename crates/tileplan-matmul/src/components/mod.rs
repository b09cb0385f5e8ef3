pub mod batch;
pub mod global;
pub mod stage;
pub mod tile;

mod config;
mod error;
mod plan;
mod unit;

pub use batch::*;
pub use config::*;
pub use error::*;
pub use global::*;
pub use plan::*;
pub use stage::*;
pub use tile::*;
pub use unit::*;
