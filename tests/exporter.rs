//! End-to-end scrapes against fake PHP-FPM pools.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use opcache_exporter::target::parse_targets;
use opcache_exporter::{gather_targets, OpcacheCollector};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};

const STATUS_JSON: &str = r#"{
    "opcache_enabled": true,
    "cache_full": false,
    "restart_pending": false,
    "restart_in_progress": false,
    "memory_usage": {
        "used_memory": 9437184,
        "free_memory": 125300736,
        "wasted_memory": 0,
        "current_wasted_percentage": 0
    },
    "interned_strings_usage": {
        "buffer_size": 8388608,
        "used_memory": 1409352,
        "free_memory": 6979256,
        "number_of_strings": 12003
    },
    "opcache_statistics": {
        "num_cached_scripts": 143,
        "num_cached_keys": 239,
        "max_cached_keys": 16229,
        "hits": 15832,
        "start_time": 1700000000,
        "last_restart_time": 0,
        "oom_restarts": 0,
        "hash_restarts": 0,
        "manual_restarts": 0,
        "misses": 150,
        "blacklist_misses": 0,
        "blacklist_miss_ratio": 0,
        "opcache_hit_rate": 99.06144
    },
    "scripts": {}
}"#;

fn record(record_type: u8, content: &[u8]) -> Vec<u8> {
    let padding = (8 - content.len() % 8) % 8;
    let mut buf = vec![
        1,
        record_type,
        0,
        1,
        (content.len() >> 8) as u8,
        content.len() as u8,
        padding as u8,
        0,
    ];
    buf.extend_from_slice(content);
    buf.extend(std::iter::repeat(0).take(padding));
    buf
}

/// Starts a pool that answers every request with `body` behind a CGI header.
fn fake_pool(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(mut conn) = conn else { continue };
            // Drain the request up to the empty FCGI_STDIN record
            loop {
                let mut header = [0u8; 8];
                if conn.read_exact(&mut header).is_err() {
                    break;
                }
                let len = u16::from_be_bytes([header[4], header[5]]) as usize;
                let mut content = vec![0u8; len + header[6] as usize];
                if conn.read_exact(&mut content).is_err() {
                    break;
                }
                if header[1] == 5 && len == 0 {
                    break;
                }
            }

            let stdout = format!("Content-type: text/html; charset=UTF-8\r\n\r\n{body}");
            let mut response = record(6, stdout.as_bytes());
            response.extend(record(6, &[]));
            response.extend(record(3, &[0, 0, 0, 0, 0, 0, 0, 0]));
            let _ = conn.write_all(&response);
        }
    });

    addr
}

fn encode(families: &[MetricFamily]) -> String {
    let mut buf = Vec::new();
    TextEncoder::new().encode(families, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

fn scrape(registry: &Registry) -> String {
    encode(&registry.gather())
}

fn registry_for(uris: &str) -> Registry {
    let registry = Registry::new();
    for target in parse_targets(uris, "/tmp/opcache.status.php").unwrap() {
        let collector = OpcacheCollector::new(target, Some(Duration::from_secs(5))).unwrap();
        registry.register(Box::new(collector)).unwrap();
    }
    registry
}

#[test]
fn test_bare_and_tcp_uris_are_distinct_series() {
    let addr = fake_pool(STATUS_JSON);
    let registry = registry_for(&format!("{addr};tcp://{addr}"));

    let output = scrape(&registry);

    assert!(output.contains(&format!(
        "opcache_statistics_hits{{fcgi_uri=\"{addr}\"}} 15832"
    )));
    assert!(output.contains(&format!(
        "opcache_statistics_hits{{fcgi_uri=\"tcp://{addr}\"}} 15832"
    )));
    assert!(output.contains(&format!(
        "opcache_interned_strings_usage_number_of_strings{{fcgi_uri=\"{addr}\"}} 12003"
    )));
    assert!(output.contains(&format!(
        "opcache_statistics_hit_rate{{fcgi_uri=\"{addr}\"}} 99.06144"
    )));

    // One HELP line per family, two series per family
    assert_eq!(output.matches("# HELP opcache_enabled ").count(), 1);
    assert_eq!(output.matches("\nopcache_enabled{").count(), 2);
}

#[test]
fn test_undecodable_target_degrades_to_zeros() {
    let good = fake_pool(STATUS_JSON);
    let broken = fake_pool("<br />\n<b>Fatal error</b>: Uncaught Error");
    let registry = registry_for(&format!("tcp://{good};tcp://{broken}"));

    let output = scrape(&registry);

    assert!(output.contains(&format!(
        "opcache_enabled{{fcgi_uri=\"tcp://{good}\"}} 1"
    )));
    assert!(output.contains(&format!(
        "opcache_enabled{{fcgi_uri=\"tcp://{broken}\"}} 0"
    )));
    assert!(output.contains(&format!(
        "opcache_memory_usage_free_memory{{fcgi_uri=\"tcp://{broken}\"}} 0"
    )));
}

#[test]
fn test_unreachable_target_still_exports_every_metric() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let registry = registry_for(&format!("tcp://{addr}"));

    let output = scrape(&registry);
    let series: Vec<_> = output
        .lines()
        .filter(|l| !l.starts_with('#') && !l.is_empty())
        .collect();

    assert_eq!(series.len(), 25);
    assert!(series.iter().all(|l| l.ends_with(" 0")));
}

#[tokio::test]
async fn test_repeated_scrapes_poll_again() {
    let addr = fake_pool(STATUS_JSON);
    let collectors: Vec<_> = parse_targets(&format!("{addr};tcp://{addr}"), "/tmp/s.php")
        .unwrap()
        .into_iter()
        .map(|target| Arc::new(OpcacheCollector::new(target, None).unwrap()))
        .collect();

    for _ in 0..3 {
        let output = encode(&gather_targets(&collectors).await);
        assert_eq!(output.matches("# HELP opcache_statistics_hits ").count(), 1);
        assert_eq!(output.matches("\nopcache_statistics_hits{").count(), 2);
    }

    for collector in &collectors {
        let report = collector.report();
        assert_eq!(report.polls, 3);
        assert_eq!(report.failures, 0);
        assert!(!report.last_poll_failed);
    }
}

#[test]
fn test_null_fields_keep_the_rest_of_the_snapshot() {
    let addr = fake_pool(
        r#"{
            "opcache_enabled": true,
            "memory_usage": null,
            "opcache_statistics": {"hits": 5, "last_restart_time": null}
        }"#,
    );
    let registry = registry_for(&addr);

    let output = scrape(&registry);

    assert!(output.contains(&format!(
        "opcache_statistics_hits{{fcgi_uri=\"{addr}\"}} 5"
    )));
    assert!(output.contains(&format!(
        "opcache_memory_usage_used_memory{{fcgi_uri=\"{addr}\"}} 0"
    )));
}
