// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demonstrates using `AsyncCoalescer` to shield a slow database from a thundering herd.
//!
//! Many concurrent requests for the same product share a single query, with the first request
//! (leader) running it and the rest (waiters) receiving a copy of its result. Requests for a
//! different product run their own query in parallel. Requests for a missing product share a
//! single failure, counted once.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use coalescer::AsyncCoalescer;

#[derive(Debug, Clone)]
struct Product {
    id: u64,
    name: &'static str,
}

#[derive(Debug)]
struct DatabaseError;

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("product not found")
    }
}

/// A database that takes a while to answer.
#[derive(Debug, Default)]
struct SlowDatabase {
    queries: AtomicUsize,
}

impl SlowDatabase {
    async fn product(&self, id: u64) -> Result<Product, DatabaseError> {
        let query = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
        println!("  [db] query #{query} for product {id}");

        tokio::time::sleep(Duration::from_millis(500)).await;

        match id {
            42 => Ok(Product { id, name: "espresso machine" }),
            7 => Ok(Product { id, name: "grinder" }),
            _ => Err(DatabaseError),
        }
    }
}

#[tokio::main]
async fn main() {
    let database = Arc::new(SlowDatabase::default());
    let products: AsyncCoalescer<u64, Product, DatabaseError> = AsyncCoalescer::builder().name("products").build();

    println!("Starting 50 concurrent requests: 35 for product 42, 10 for product 7, 5 for missing product 404...\n");

    let mut handles = Vec::new();
    for request in 0..50 {
        let products = products.clone();
        let database = Arc::clone(&database);
        let id = match request % 10 {
            0 | 5 => 7,
            9 => 404,
            _ => 42,
        };

        handles.push(tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let result = products.call(id, || async move { database.product(id).await }).await;
            (request, start.elapsed(), result)
        }));
    }

    for handle in handles {
        let (request, elapsed, result) = handle.await.expect("Task panicked");
        match result {
            Ok(product) => println!("  [request {request:>2}] {} ({}) in {elapsed:?}", product.name, product.id),
            Err(error) => println!("  [request {request:>2}] failed: {error}"),
        }
    }

    let stats = products.stats();
    println!(
        "\nDatabase queried {} time(s) for 50 requests. hits: {}, misses: {}, errors: {}, hit rate: {:.0}%",
        database.queries.load(Ordering::SeqCst),
        stats.hits,
        stats.misses,
        stats.errors,
        stats.hit_rate() * 100.0,
    );
}
