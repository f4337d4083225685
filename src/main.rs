#![allow(dead_code)]

mod benchmark;
mod command;
mod error;
mod index;
mod namespace;
mod record;

use tracing::Level;

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    benchmark::BenchmarkManager::run("benchmark.txt");
}
