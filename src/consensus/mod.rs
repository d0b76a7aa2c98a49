pub mod chain;
pub mod poi;
pub mod tracker;

pub use chain::*;
pub use poi::*;
pub use tracker::*;
