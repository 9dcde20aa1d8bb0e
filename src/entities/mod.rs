//! Project document types
//!
//! - [`TestPoint`] - a calibration point: UUT, TMDE, measurement and risk requirements
//! - [`Instrument`] - accuracy specifications by function and range

pub mod instrument;
pub mod test_point;

pub use instrument::{Instrument, InstrumentError, InstrumentFunction, InstrumentRange, RangeMatch};
pub use test_point::{Requirements, StoredResults, TestPoint, Uut};
