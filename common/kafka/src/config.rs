use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

/// One subscription: a consumer group reading a single topic.
///
/// Not read from the environment directly, a service usually runs several loops
/// with different groups and topics and builds one of these per loop.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

impl ConsumerConfig {
    pub fn new(group: &str, topic: &str, offset_reset: &str) -> Self {
        Self {
            kafka_consumer_group: group.to_owned(),
            kafka_consumer_topic: topic.to_owned(),
            kafka_consumer_offset_reset: offset_reset.to_owned(),
        }
    }
}
