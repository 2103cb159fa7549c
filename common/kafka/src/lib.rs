pub mod config;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod memory;
pub mod transport;
