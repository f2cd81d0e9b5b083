//! End-to-end runs against mocked sources and a scratch output directory.

use chrono::{DateTime, TimeZone, Utc};
use paperfeed::feed::{resolve_sources, Fetcher};
use paperfeed::filter::QuerySet;
use paperfeed::merge::MergeMode;
use paperfeed::pipeline::{Pipeline, RunSettings};
use paperfeed::report::Stage;
use paperfeed::storage::{parse_persisted, ChannelInfo, FeedWriter};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JAN_2024: &str = "Mon, 01 Jan 2024 00:00:00 GMT";
const FEB_2024: &str = "Thu, 01 Feb 2024 00:00:00 GMT";

fn rss(title: &str, items: &[(&str, &str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(guid, title, date)| {
            format!(
                "<item><guid>{guid}</guid><title>{title}</title>\
                 <link>https://papers.example/{guid}</link>\
                 <description>About {title}</description>\
                 <pubDate>{date}</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title>{body}</channel></rss>"#
    )
}

async fn mount_feed(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn built_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn pipeline(urls: &[String], queries: &[&str], out: &Path, mode: MergeMode) -> Pipeline {
    Pipeline::new(
        resolve_sources(urls),
        QuerySet::parse(queries),
        Fetcher::new("paperfeed-test", Duration::from_secs(1))
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1)),
        FeedWriter::new(out, ChannelInfo::default()),
        RunSettings {
            mode,
            arxiv_enrich: false,
            request_delay: Duration::ZERO,
            ..RunSettings::default()
        },
    )
}

fn output_guids(out: &Path) -> Vec<String> {
    let bytes = std::fs::read(out).unwrap();
    parse_persisted(&bytes)
        .unwrap()
        .items
        .into_iter()
        .map(|i| i.guid)
        .collect()
}

#[tokio::test]
async fn test_slow_source_fails_alone() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "/a.xml",
        rss("Journal A", &[("a1", "Fuzzing compilers", JAN_2024)]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/slow.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss("Slow", &[("s1", "Fuzzing late", JAN_2024)]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    mount_feed(
        &server,
        "/c.xml",
        rss("Journal C", &[("c1", "Fuzzing kernels", FEB_2024)]),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("feed.xml");
    let urls: Vec<String> = ["a", "slow", "c"]
        .iter()
        .map(|n| format!("{}/{}.xml", server.uri(), n))
        .collect();

    let report = pipeline(&urls, &["fuzzing"], &out, MergeMode::default())
        .run(built_at())
        .await
        .unwrap();

    assert_eq!(report.sources, 3);
    assert_eq!(report.sources_failed, 1);
    assert_eq!(report.failures_in(Stage::Fetch).count(), 1);
    assert!(report.failures[0].target.ends_with("/slow.xml"));
    assert_eq!(output_guids(&out), vec!["c1", "a1"]);
}

#[tokio::test]
async fn test_incremental_run_keeps_one_copy_of_each_item() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("feed.xml");
    let urls = vec![format!("{}/feed.xml", server.uri())];

    mount_feed(
        &server,
        "/feed.xml",
        rss("Journal of Tests", &[("A", "Fuzzing one", JAN_2024)]),
    )
    .await;
    let first = pipeline(&urls, &["fuzzing"], &out, MergeMode::default())
        .run(built_at())
        .await
        .unwrap();
    assert_eq!(first.new_items.len(), 1);

    server.reset().await;
    mount_feed(
        &server,
        "/feed.xml",
        rss(
            "Journal of Tests",
            &[("A", "Fuzzing one", JAN_2024), ("B", "Fuzzing two", FEB_2024)],
        ),
    )
    .await;
    let second = pipeline(&urls, &["fuzzing"], &out, MergeMode::default())
        .run(built_at())
        .await
        .unwrap();

    let new: Vec<&str> = second.new_items.iter().map(|i| i.guid.as_str()).collect();
    assert_eq!(new, vec!["B"]);
    assert_eq!(second.output_items, 2);
    assert_eq!(output_guids(&out), vec!["B", "A"]);

    let xml = std::fs::read_to_string(&out).unwrap();
    assert_eq!(xml.matches("<guid isPermaLink=\"false\">A</guid>").count(), 1);
}

#[tokio::test]
async fn test_prune_drops_only_when_requested() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("feed.xml");
    let urls = vec![format!("{}/feed.xml", server.uri())];
    mount_feed(
        &server,
        "/feed.xml",
        rss(
            "Journal of Tests",
            &[("A", "Fuzzing one", JAN_2024), ("B", "Symbolic two", FEB_2024)],
        ),
    )
    .await;

    pipeline(&urls, &["fuzzing", "symbolic"], &out, MergeMode::default())
        .run(built_at())
        .await
        .unwrap();
    assert_eq!(output_guids(&out), vec!["B", "A"]);

    let kept = pipeline(
        &urls,
        &["fuzzing"],
        &out,
        MergeMode::Incremental { prune: false },
    )
    .run(built_at())
    .await
    .unwrap();
    assert_eq!(kept.pruned_items, 0);
    assert_eq!(output_guids(&out), vec!["B", "A"]);

    let pruned = pipeline(
        &urls,
        &["fuzzing"],
        &out,
        MergeMode::Incremental { prune: true },
    )
    .run(built_at())
    .await
    .unwrap();
    assert_eq!(pruned.pruned_items, 1);
    assert_eq!(output_guids(&out), vec!["A"]);
}

#[tokio::test]
async fn test_rebuild_is_byte_identical_across_runs() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "/feed.xml",
        rss(
            "Journal of Tests",
            &[
                ("A", "Fuzzing &lt;one&gt; &amp; more", JAN_2024),
                ("B", "Fuzzing two", FEB_2024),
                ("C", "Unrelated", FEB_2024),
            ],
        ),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("feed.xml");
    let urls = vec![format!("{}/feed.xml", server.uri())];

    pipeline(&urls, &["fuzzing"], &out, MergeMode::Rebuild)
        .run(built_at())
        .await
        .unwrap();
    let first = std::fs::read(&out).unwrap();

    let report = pipeline(&urls, &["fuzzing"], &out, MergeMode::Rebuild)
        .run(built_at())
        .await
        .unwrap();
    let second = std::fs::read(&out).unwrap();

    assert_eq!(first, second);
    assert_eq!(report.output_items, 2);
    assert!(report.new_items.is_empty());
}

#[tokio::test]
async fn test_dblp_stream_expands_newest_volume_only() {
    let server = MockServer::start().await;
    let base = server.uri();
    let listing: String = (0..50)
        .map(|i| {
            format!(
                "<item><title>x{y}</title><link>{base}/db/conf/x/x{y}.html</link>\
                 <pubDate>{JAN_2024}</pubDate></item>",
                y = 2024 - i
            )
        })
        .collect();
    mount_feed(
        &server,
        "/feed/streams/conf/x.rss",
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel>
<title>dblp: new volumes for streams/conf/x</title>{listing}</channel></rss>"#
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/db/conf/x/x2024.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<?xml version="1.0"?><bht><dblpcites><r>
<inproceedings key="conf/x/Lee24"><author>Ann Lee</author><title>Fuzzing at scale.</title>
<year>2024</year><ee>https://doi.org/10.1/fuzz</ee></inproceedings>
</r><r>
<inproceedings key="conf/x/Kim24"><author>Bo Kim</author><title>Type inference.</title>
<year>2024</year><ee>https://doi.org/10.1/types</ee></inproceedings>
</r></dblpcites></bht>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("feed.xml");
    let urls = vec![format!("{}/feed/streams/conf/x.rss", base)];

    let report = pipeline(&urls, &["fuzzing"], &out, MergeMode::default())
        .run(built_at())
        .await
        .unwrap();

    assert_eq!(report.fetched_items, 2);
    assert_eq!(report.matched_items, 1);
    assert_eq!(report.new_items[0].authors, vec!["Ann Lee"]);
    assert!(report.failures.is_empty());
}

fn dblp_volume(key: &str, title: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><bht><dblpcites><r>
<inproceedings key="conf/x/{key}"><author>Ann Lee</author><title>{title}.</title>
<year>2024</year><ee>https://doi.org/10.1/{key}</ee></inproceedings>
</r></dblpcites></bht>"#
    )
}

#[tokio::test]
async fn test_dblp_progresses_past_volumes_without_matches() {
    let server = MockServer::start().await;
    let base = server.uri();
    let listing: String = ["x2024", "x2023"]
        .iter()
        .map(|v| {
            format!(
                "<item><title>{v}</title><link>{base}/db/conf/x/{v}.html</link>\
                 <pubDate>{JAN_2024}</pubDate></item>"
            )
        })
        .collect();
    mount_feed(
        &server,
        "/feed/streams/conf/x.rss",
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel>
<title>dblp: new volumes for streams/conf/x</title>{listing}</channel></rss>"#
        ),
    )
    .await;
    mount_feed(&server, "/db/conf/x/x2024.xml", dblp_volume("Kim24", "Type inference")).await;
    mount_feed(&server, "/db/conf/x/x2023.xml", dblp_volume("Lee23", "Fuzzing at scale")).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("feed.xml");
    let urls = vec![format!("{}/feed/streams/conf/x.rss", base)];

    let mut outputs = Vec::new();
    for _ in 0..3 {
        let report = pipeline(&urls, &["fuzzing"], &out, MergeMode::default())
            .run(built_at())
            .await
            .unwrap();
        outputs.push(report.output_items);
    }

    let volume_fetches: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .filter(|p| p.starts_with("/db/"))
        .collect();
    assert_eq!(
        volume_fetches,
        vec!["/db/conf/x/x2024.xml", "/db/conf/x/x2023.xml"]
    );
    assert_eq!(outputs, vec![0, 1, 1]);
    assert_eq!(output_guids(&out), vec!["dblp:conf/x/Lee23"]);

    let persisted = parse_persisted(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(persisted.volumes.len(), 2);
}
