//! Trading engine: ladder math, order placement, and the maker round.

pub mod ladder;
pub mod maker;
pub mod ope;

pub use maker::{Maker, MakerCommand};
pub use ope::{OrderPlacementEngine, OrderPlacer};
