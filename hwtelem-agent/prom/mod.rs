pub mod sink;

pub use sink::PrometheusSink;
