mod accumulator;

pub use accumulator::*;
