pub mod butterworth;

pub use butterworth::{ButterworthLowPass, FilterState, GravityFilter};
