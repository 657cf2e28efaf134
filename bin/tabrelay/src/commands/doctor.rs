use std::time::Duration;

use tabrelay_core::{Config, Paths};
use url::Url;

/// Run environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 tabrelay doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    let config_file = paths.config_file();
    if config_file.exists() {
        print_ok("Config file exists", &config_file.display().to_string());
        ok_count += 1;
    } else {
        print_warn(
            "Config file not found",
            "Run `tabrelay config init` (defaults apply until then)",
        );
        warn_count += 1;
    }

    let config = Config::load_or_default(&paths)?;

    match Url::parse(&config.relay.endpoint) {
        Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {
            print_ok("Controller endpoint", &config.relay.endpoint);
            ok_count += 1;
        }
        Ok(url) => {
            print_err(
                "Controller endpoint scheme",
                &format!("expected ws:// or wss://, got {}://", url.scheme()),
            );
            err_count += 1;
        }
        Err(e) => {
            print_err("Controller endpoint invalid", &e.to_string());
            err_count += 1;
        }
    }

    println!();

    // --- 2. Controller ---
    println!("🔌 Controller");
    match probe(&config.relay.endpoint).await {
        Ok(()) => {
            print_ok("Controller reachable", &config.relay.endpoint);
            ok_count += 1;
        }
        Err(e) => {
            print_warn("Controller not reachable", &e);
            warn_count += 1;
        }
    }
    println!();

    // --- 3. Browser ---
    println!("🌐 Browser");
    match probe(&config.browser.cdp_url).await {
        Ok(()) => {
            print_ok("DevTools endpoint reachable", &config.browser.cdp_url);
            ok_count += 1;
        }
        Err(e) => {
            print_warn("DevTools endpoint not reachable", &e);
            println!("     Start the browser with remote debugging enabled");
            warn_count += 1;
        }
    }
    println!();

    // --- Summary ---
    println!("================================");
    println!(
        "Summary: {} ok, {} warnings, {} errors",
        ok_count, warn_count, err_count
    );
    if err_count > 0 {
        println!("❌ Fix the errors above before running `tabrelay run`");
    } else if warn_count > 0 {
        println!("⚠️  Usable, but some peers are offline");
    } else {
        println!("✅ All checks passed");
    }
    println!();

    Ok(())
}

/// Attempt a WebSocket handshake with a short deadline.
async fn probe(url: &str) -> Result<(), String> {
    let attempt = tokio_tungstenite::connect_async(url);
    match tokio::time::timeout(Duration::from_secs(3), attempt).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("handshake timed out".to_string()),
    }
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}
