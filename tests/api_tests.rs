//! Integration tests for the VOD proxy pipeline: extraction, playlist
//! rewriting, background segment prefetch, and the segment cache, driven
//! against a real HTTP server (spec.md §8 scenarios 4 and 5). These exercise
//! `ProviderCore`/`SegmentCache`/`rewrite` together through their real public
//! APIs rather than through the axum router, since the live-channel side of
//! `GatewayContext` requires a running headless browser.

use iptv_gateway::provider::cache::SegmentCache;
use iptv_gateway::provider::core::ProviderCore;
use iptv_gateway::provider::demo::DemoProvider;
use iptv_gateway::provider::rewrite::{encode_url, rewrite_playlist};
use iptv_gateway::provider::ExtractHints;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PLAYLIST: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:6\nseg1.ts\nseg2.ts\n#EXT-X-ENDLIST\n";

#[tokio::test]
async fn vod_pipeline_rewrites_playlist_and_prefetches_segments_into_cache() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/master.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAYLIST))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/seg1.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"segment-one".to_vec()).insert_header("content-type", "video/mp2t"))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/seg2.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"segment-two".to_vec()).insert_header("content-type", "video/mp2t"))
        .mount(&upstream)
        .await;

    let master_url = format!("{}/master.m3u8", upstream.uri());
    let provider = Arc::new(DemoProvider::new("demo", vec![master_url.clone()]));
    let core = ProviderCore::new(provider, Duration::from_secs(60), Duration::from_secs(300));
    let cache = Arc::new(SegmentCache::new(600, Duration::from_secs(900)));
    let client = reqwest::Client::new();

    let (resolved_url, _headers, _content_type) = core
        .ensure_stream_url("movie1", "movie", &ExtractHints::default())
        .await
        .expect("extraction succeeds");
    assert_eq!(resolved_url, master_url);

    let playlist = client.get(&resolved_url).send().await.unwrap().text().await.unwrap();
    let proxy_base = "http://gw/vod/demo".to_string();
    let rewritten = rewrite_playlist(&playlist, &resolved_url, &proxy_base, "movie1");

    // Only proxy segment lines or preserved comments survive (spec.md §8 invariant 6).
    for line in rewritten.lines() {
        assert!(line.starts_with('#') || line.starts_with("http://gw/vod/demo/segment/"));
    }
    assert!(!rewritten.contains("ENDLIST"));

    core.schedule_prefetch("movie1".to_string(), rewritten, proxy_base, cache.clone(), client, Duration::from_millis(5))
        .await;

    // Prefetch runs in the background; give it a moment to populate the cache.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seg1_key = encode_url(&format!("{}/seg1.ts", upstream.uri()));
    let seg2_key = encode_url(&format!("{}/seg2.ts", upstream.uri()));
    let entry1 = cache.get(&seg1_key).await.expect("seg1 prefetched");
    let entry2 = cache.get(&seg2_key).await.expect("seg2 prefetched");
    assert_eq!(entry1.bytes.as_ref(), b"segment-one");
    assert_eq!(entry2.bytes.as_ref(), b"segment-two");
}

#[tokio::test]
async fn prefetch_stops_on_upstream_403_and_urgent_refresh_replaces_url() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expired.ts"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&upstream)
        .await;

    let old_url = format!("{}/old-master.m3u8", upstream.uri());
    let new_url = format!("{}/new-master.m3u8", upstream.uri());
    let provider = Arc::new(DemoProvider::new("demo", vec![old_url.clone(), new_url.clone()]));
    let core = ProviderCore::new(provider, Duration::from_secs(60), Duration::from_secs(300));

    core.ensure_stream_url("movie2", "movie", &ExtractHints::default()).await.unwrap();
    assert_eq!(core.get_active_stream_url("movie2").await.unwrap().0, old_url);

    // Simulate a segment fetch observing an expired (403) upstream URL: the
    // real segment handler calls `urgent_refresh` on exactly this signal.
    let client = reqwest::Client::new();
    let expired_segment = format!("{}/expired.ts", upstream.uri());
    let status = client.get(&expired_segment).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 403);

    let (refreshed_url, _headers) = core.urgent_refresh("movie2", "movie", &ExtractHints::default()).await.unwrap();
    assert_eq!(refreshed_url, new_url);
    assert_eq!(core.get_active_stream_url("movie2").await.unwrap().0, new_url);
}

#[tokio::test]
async fn prefetch_skips_segments_already_in_cache() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/master.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nseg1.ts\n"))
        .mount(&upstream)
        .await;
    // No mock registered for /seg1.ts: if prefetch tried to fetch it, the
    // request would 404 against wiremock's default "no matching mock" response.

    let master_url = format!("{}/master.m3u8", upstream.uri());
    let provider = Arc::new(DemoProvider::new("demo", vec![master_url.clone()]));
    let core = ProviderCore::new(provider, Duration::from_secs(60), Duration::from_secs(300));
    let cache = Arc::new(SegmentCache::new(600, Duration::from_secs(900)));
    let client = reqwest::Client::new();

    let seg_key = encode_url(&format!("{}/seg1.ts", upstream.uri()));
    cache.put(seg_key.clone(), bytes::Bytes::from_static(b"already-cached"), "video/mp2t".to_string()).await;

    let (resolved_url, _, _) = core.ensure_stream_url("movie3", "movie", &ExtractHints::default()).await.unwrap();
    let playlist = client.get(&resolved_url).send().await.unwrap().text().await.unwrap();
    let rewritten = rewrite_playlist(&playlist, &resolved_url, "http://gw/vod/demo", "movie3");

    core.schedule_prefetch("movie3".to_string(), rewritten, "http://gw/vod/demo".to_string(), cache.clone(), client, Duration::from_millis(5))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let entry = cache.get(&seg_key).await.expect("cached entry untouched");
    assert_eq!(entry.bytes.as_ref(), b"already-cached");
}
