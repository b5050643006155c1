pub mod logging;

pub use logging::{LoggerConfig, init_logger};
