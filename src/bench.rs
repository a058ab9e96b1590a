//! Throughput micro-benchmarks for the arena hot paths
