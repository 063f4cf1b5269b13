use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use openmetrics_scrape_validator::ScrapeLoopBuilder;

/// Serves the exposition produced by `render` on an ephemeral local port and
/// returns the endpoint to scrape.
async fn serve_expositions<F>(render: F) -> Uri
where
    F: Fn() -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap_or_else(|e| panic!("unable to bind an ephemeral port: {:?}", e));
    let addr = listener.local_addr().expect("unable to obtain local address from TcpListener");

    let render = Arc::new(render);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let render = render.clone();
            tokio::spawn(async move {
                let service = service_fn(move |_req| {
                    let body = render.as_ref()();
                    async move { Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body)))) }
                });
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
            });
        }
    });

    format!("http://{}", addr).parse::<Uri>().unwrap_or_else(|e| panic!("bad endpoint: {:?}", e))
}

#[test]
fn test_scrape_loop_clean_endpoint() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("failed to create test runtime: {:?}", e));

    runtime.block_on(async {
        let requests = Arc::new(AtomicU64::new(0));
        let counter = requests.clone();
        let endpoint = serve_expositions(move || {
            let total = 17 + counter.fetch_add(1, Ordering::SeqCst);
            format!(
                "# TYPE scrape_requests counter\n# HELP scrape_requests Requests observed so far.\nscrape_requests_total {}\n# EOF\n",
                total
            )
        })
        .await;

        let mut scrape_loop = ScrapeLoopBuilder::new()
            .with_scrape_interval(Duration::from_millis(50))
            .with_scrape_timeout(Duration::from_secs(1))
            .with_kill_after(Duration::from_millis(220))
            .build(endpoint);
        let clean = scrape_loop.run().await;

        assert!(clean, "expected a clean scrape/validate run");
        assert!(requests.load(Ordering::SeqCst) >= 2, "expected multiple scrapes");
    });
}

#[test]
fn test_scrape_loop_flags_decreasing_counter() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("failed to create test runtime: {:?}", e));

    runtime.block_on(async {
        let remaining = Arc::new(AtomicU64::new(100));
        let counter = remaining.clone();
        let endpoint = serve_expositions(move || {
            let total = counter.fetch_sub(1, Ordering::SeqCst);
            format!("# TYPE jobs counter\njobs_total {}\n# EOF\n", total)
        })
        .await;

        let mut scrape_loop = ScrapeLoopBuilder::new()
            .with_scrape_interval(Duration::from_millis(50))
            .with_scrape_timeout(Duration::from_secs(1))
            .with_kill_after(Duration::from_millis(220))
            .build(endpoint);
        let clean = scrape_loop.run().await;

        assert!(!clean, "a decreasing counter must fail the run");
    });
}
