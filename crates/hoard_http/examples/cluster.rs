// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs a three-peer fleet on loopback and shows keys resolving to their
//! ring owners.

use futures::future::BoxFuture;
use hoard::{ByteView, ByteViewSink, Getter, GetterError, Group, Registry, Sink};
use hoard_http::HttpPool;
use tokio::net::TcpListener;

struct OwnerTagger {
    self_url: String,
}

impl Getter for OwnerTagger {
    fn get<'a>(
        &'a self,
        key: &'a str,
        dest: &'a mut dyn Sink,
    ) -> BoxFuture<'a, Result<(), GetterError>> {
        Box::pin(async move {
            dest.set_string(&format!("{} generated {key}", self.self_url))?;
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut listeners = Vec::new();
    let mut urls = Vec::new();
    for _ in 0..3 {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        urls.push(format!("http://{}", listener.local_addr()?));
        listeners.push(listener);
    }

    let mut groups: Vec<Group> = Vec::new();
    for (listener, url) in listeners.into_iter().zip(&urls) {
        let registry = Registry::new();
        let pool = HttpPool::new(&registry, url.clone());
        pool.set_peers(&urls);
        groups.push(registry.new_group(
            "demo",
            1 << 20,
            OwnerTagger {
                self_url: url.clone(),
            },
        ));
        tokio::spawn(async move {
            let _ = pool.serve(listener).await;
        });
    }

    for i in 0..10 {
        let key = format!("object-{i}");
        let mut out = ByteView::default();
        groups[0].get(&key, &mut ByteViewSink::new(&mut out)).await?;
        println!("{key}: {}", out.to_string_lossy());
    }

    Ok(())
}
