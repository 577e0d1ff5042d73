// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demonstrates fill collapsing: 100 concurrent gets, one slow fill.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use hoard::{ByteView, ByteViewSink, Getter, GetterError, Registry, Sink};

struct SlowGetter {
    fills: Arc<AtomicUsize>,
}

impl Getter for SlowGetter {
    fn get<'a>(
        &'a self,
        key: &'a str,
        dest: &'a mut dyn Sink,
    ) -> BoxFuture<'a, Result<(), GetterError>> {
        Box::pin(async move {
            self.fills.fetch_add(1, Ordering::SeqCst);
            // Pretend this is an expensive backend call.
            tokio::time::sleep(Duration::from_millis(200)).await;
            dest.set_string(&format!("rendered:{key}"))?;
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() {
    let fills = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    let group = registry.new_group(
        "renders",
        64 << 20,
        SlowGetter {
            fills: Arc::clone(&fills),
        },
    );

    let mut tasks = Vec::new();
    for _ in 0..100 {
        let group = group.clone();
        tasks.push(tokio::spawn(async move {
            let mut out = ByteView::default();
            group
                .get("hero-image", &mut ByteViewSink::new(&mut out))
                .await
                .expect("fill succeeds");
            out
        }));
    }

    for task in tasks {
        let value = task.await.expect("task completes");
        assert_eq!(value, "rendered:hero-image");
    }

    let stats = group.stats();
    println!("gets:          {}", stats.gets.get());
    println!("backend fills: {}", fills.load(Ordering::SeqCst));
    println!("deduped:       {}", stats.loads_deduped.get());
    println!("cache hits:    {}", stats.cache_hits.get());
}
