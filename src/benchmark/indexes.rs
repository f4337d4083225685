use crate::benchmark::{BenchmarkResult, DataPoint};
use crate::index::{BTreeImpl, IndexKind, OrderedIndex};
use crate::record::Payload;
use std::time::Instant;

enum TestMode {
    Random,
    Sequential,
}

/// Runs read-write throughput measurements against one boxed backend.
fn run(
    mut index: Box<dyn OrderedIndex>,
    read_title: &str,
    write_title: &str,
    test_mode: TestMode,
) -> Vec<BenchmarkResult> {
    // each datapoint covers `scale` operations
    let scale = 20000_i64;
    let iterations = 25_i64;
    let magic = 921544879_i64; // prime, coprime with the key space

    // baseline cost of key formatting alone
    let upper_bound = scale * iterations;
    let baseline_loop = Instant::now();
    let mut preserved = 0_usize;
    for i in 0..scale {
        let key = format!("{i:012}-key");
        preserved += key.len();
    }
    let baseline_loop = baseline_loop.elapsed().as_nanos() + (preserved as u128) % 2;

    let mut read_result = BenchmarkResult::new(read_title);
    let mut write_result = BenchmarkResult::new(write_title);

    for iteration in 1..=iterations {
        // evaluate write speed
        let loop_time = Instant::now();
        for i in (iteration - 1) * scale..iteration * scale {
            let counter = match test_mode {
                TestMode::Random => (i * magic) % upper_bound,
                TestMode::Sequential => i,
            };
            let key = format!("{counter:012}-key");
            let value = Payload::from_slice(format!("value-{counter}").as_bytes());
            let _ = index.insert(key, value);
        }
        let loop_time = loop_time.elapsed().as_nanos().saturating_sub(baseline_loop);
        write_result.push(DataPoint {
            x: (iteration * scale) as f64,
            y: scale as f64 / ((loop_time as f64) / 1.0e9),
        });

        // evaluate read speed over the same keys
        let loop_time = Instant::now();
        let mut hits = 0_usize;
        for i in (iteration - 1) * scale..iteration * scale {
            let counter = match test_mode {
                TestMode::Random => (i * magic) % upper_bound,
                TestMode::Sequential => i,
            };
            let key = format!("{counter:012}-key");
            if index.get(&key).is_ok() {
                hits += 1;
            }
        }
        let loop_time = loop_time.elapsed().as_nanos().saturating_sub(baseline_loop)
            + (hits as u128) % 2;
        read_result.push(DataPoint {
            x: (iteration * scale) as f64,
            y: scale as f64 / ((loop_time as f64) / 1.0e9),
        });
    }

    vec![read_result, write_result]
}

pub fn avl_rand_rw() -> Vec<BenchmarkResult> {
    run(
        IndexKind::Avl.new_index(),
        "index-avl-rand-read",
        "index-avl-rand-write",
        TestMode::Random,
    )
}

pub fn avl_seq_rw() -> Vec<BenchmarkResult> {
    run(
        IndexKind::Avl.new_index(),
        "index-avl-seq-read",
        "index-avl-seq-write",
        TestMode::Sequential,
    )
}

pub fn rbtree_rand_rw() -> Vec<BenchmarkResult> {
    run(
        IndexKind::RedBlack.new_index(),
        "index-rbtree-rand-read",
        "index-rbtree-rand-write",
        TestMode::Random,
    )
}

pub fn rbtree_seq_rw() -> Vec<BenchmarkResult> {
    run(
        IndexKind::RedBlack.new_index(),
        "index-rbtree-seq-read",
        "index-rbtree-seq-write",
        TestMode::Sequential,
    )
}

pub fn btree_rand_rw<const M: usize>() -> Vec<BenchmarkResult> {
    run(
        Box::new(BTreeImpl::<String, Payload, M>::new()),
        &format!("index-btree_{M}-rand-read"),
        &format!("index-btree_{M}-rand-write"),
        TestMode::Random,
    )
}

pub fn btree_seq_rw<const M: usize>() -> Vec<BenchmarkResult> {
    run(
        Box::new(BTreeImpl::<String, Payload, M>::new()),
        &format!("index-btree_{M}-seq-read"),
        &format!("index-btree_{M}-seq-write"),
        TestMode::Sequential,
    )
}

pub fn hashmap_rand_rw() -> Vec<BenchmarkResult> {
    run(
        IndexKind::Map.new_index(),
        "index-hashmap-rand-read",
        "index-hashmap-rand-write",
        TestMode::Random,
    )
}

pub fn hashmap_seq_rw() -> Vec<BenchmarkResult> {
    run(
        IndexKind::Map.new_index(),
        "index-hashmap-seq-read",
        "index-hashmap-seq-write",
        TestMode::Sequential,
    )
}
