//! Check command: polls every configured target once.

use anyhow::{bail, Context, Result};
use opcache_exporter::script::StatusScript;
use opcache_exporter::{Config, FcgiStatusClient, StatusSnapshot, StatusSource};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

#[derive(Serialize)]
struct CheckResult {
    fcgi_uri: String,
    ok: bool,
    duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<StatusSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Polls each target and prints the outcome. Fails when any target fails.
pub fn command_check(json: bool, config: &Config) -> Result<()> {
    let script = StatusScript::resolve(config.script_path.as_deref(), config.script_dir.as_deref())
        .context("Failed to prepare status script")?;
    let targets = config.targets(script.path())?;

    if !json {
        println!("🔍 OPcache Exporter - Target Check");
        println!("==================================");
        println!("\n📄 Status script: {}", script.path().display());
    }

    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        let uri = target.uri().to_string();
        debug!("Checking target {}", uri);

        let client = FcgiStatusClient::new(target, config.fcgi_timeout());
        let start = Instant::now();
        let outcome = client.fetch();
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(status) => CheckResult {
                fcgi_uri: uri,
                ok: true,
                duration_ms,
                status: Some(status),
                error: None,
            },
            Err(e) => CheckResult {
                fcgi_uri: uri,
                ok: false,
                duration_ms,
                status: None,
                error: Some(e.to_string()),
            },
        };

        if !json {
            print_result(&result);
        }
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.ok).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if failed == 0 {
        println!("\n✅ All {} targets reachable", results.len());
    } else {
        println!("\n❌ {} of {} targets failed", failed, results.len());
    }

    if failed > 0 {
        bail!("{} target(s) could not be polled", failed);
    }
    Ok(())
}

fn print_result(result: &CheckResult) {
    println!("\n🔌 {}", result.fcgi_uri);
    match (&result.status, &result.error) {
        (Some(status), _) => {
            println!("   ✅ Polled in {:.1}ms", result.duration_ms);
            println!(
                "   ℹ️  enabled={} cache_full={} hit_rate={:.2}% cached_scripts={}",
                status.opcache_enabled,
                status.cache_full,
                status.opcache_statistics.opcache_hit_rate,
                status.opcache_statistics.num_cached_scripts
            );
            println!(
                "   ℹ️  memory used={} free={} wasted={}",
                status.memory_usage.used_memory,
                status.memory_usage.free_memory,
                status.memory_usage.wasted_memory
            );
        }
        (None, Some(err)) => {
            println!("   ❌ {}", err);
        }
        (None, None) => {}
    }
}
