//! Event meters and the catalog that names them.

mod clock;
mod ewma;
mod meter;
mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ewma::{Ewma, TICK_INTERVAL};
pub use meter::{Meter, MeterSnapshot};
pub use registry::MetricRegistry;
