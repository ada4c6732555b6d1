// Domain layer: models, the outbound contract, and ports (interfaces) implemented by adapters.

pub mod contract;
pub mod model;
pub mod ports;
