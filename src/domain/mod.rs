// Domain layer: tabular model, change records and the ports the pipelines depend on.

pub mod change;
pub mod model;
pub mod ports;
