//! Key → partition routing, compatible with Kafka's default partitioner.

use murmur2::{KAFKA_SEED, murmur2};

/// Partition for `key` among `partition_count` partitions.
///
/// Matches `Utils.toPositive(Utils.murmur2(key)) % numPartitions`, so keys
/// land where a Kafka client would put them.
pub fn compute_partition(key: &[u8], partition_count: i32) -> i32 {
    debug_assert!(partition_count > 0, "partition_count must be positive");
    let partition_count = partition_count.max(1);

    let hash = murmur2(key, KAFKA_SEED);
    ((hash & 0x7fff_ffff) as i32) % partition_count
}
