mod indexes;

use json::{object, JsonValue};
use std::fs::File;
use std::io::Write;
use tracing::info;

/// Result of one benchmark run.
pub struct BenchmarkResult {
    title: String,
    data: Vec<DataPoint>,
}

impl BenchmarkResult {
    pub fn new(title: &str) -> Self {
        Self {
            title: String::from(title),
            data: vec![],
        }
    }

    pub fn push(&mut self, point: DataPoint) {
        self.data.push(point);
    }

    pub fn to_json(&self) -> JsonValue {
        object! {
            "title" => String::from(&self.title),
            "data" => JsonValue::Array(self.data.iter().map(|item| item.to_json()).collect()),
        }
    }
}

/// An (x, y) data point pair.
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

impl DataPoint {
    pub fn to_json(&self) -> JsonValue {
        object! {
            "x" => self.x,
            "y" => self.y,
        }
    }
}

/// Facade of getting all results.
pub struct BenchmarkManager {
    results: Vec<BenchmarkResult>,
    path: String,
}

/// Execute all benchmarks and export to file.
///
/// Usage: `BenchmarkManager::run(...path)`.
impl BenchmarkManager {
    pub fn run(path: &str) {
        Self {
            results: vec![],
            path: String::from(path),
        }
        .execute()
    }

    /// This function contains a list of benchmark items to run.
    fn execute(&mut self) {
        self.add(indexes::avl_rand_rw());
        self.add(indexes::avl_seq_rw());
        self.add(indexes::rbtree_rand_rw());
        self.add(indexes::rbtree_seq_rw());
        self.add(indexes::btree_rand_rw::<2>());
        self.add(indexes::btree_seq_rw::<2>());
        self.add(indexes::btree_rand_rw::<8>());
        self.add(indexes::btree_seq_rw::<8>());
        self.add(indexes::btree_rand_rw::<16>());
        self.add(indexes::btree_seq_rw::<16>());
        self.add(indexes::hashmap_rand_rw());
        self.add(indexes::hashmap_seq_rw());
    }

    /// Add records to the result, saving on-the-go so partial runs still
    /// leave usable output behind.
    fn add(&mut self, results: Vec<BenchmarkResult>) {
        for result in results {
            info!(title = result.title.as_str(), points = result.data.len(), "benchmark finished");
            self.results.push(result);
        }
        if let Err(err) = self.save() {
            info!(error = %err, "could not write benchmark results");
        }
    }

    /// Save results to file.
    fn save(&mut self) -> std::io::Result<()> {
        let obj = JsonValue::Array(self.results.iter().map(|result| result.to_json()).collect());
        let doc = obj.pretty(2);
        let mut file = File::create(&self.path)?;
        file.write_all(doc.as_bytes())?;
        Ok(())
    }
}
