use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{error, info};

use frame_rs::session::{FrameSession, FrameSessionConfig};
use frame_rs::signal::disconnect_on_termination;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=frame_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = FrameSessionConfig {
        scan_timeout_secs: 15,
        echo: true,
        ..FrameSessionConfig::default()
    };
    let scan_timeout_secs = config.scan_timeout_secs;

    // ── Connect ───────────────────────────────────────────────────────────────
    let session = Arc::new(FrameSession::with_default_adapter(config).await?);
    tokio::spawn(disconnect_on_termination(Arc::clone(&session)));

    info!("Connecting to Frame …");
    if !session.connect(scan_timeout_secs).await? {
        bail!("no Frame found within {scan_timeout_secs} s");
    }
    info!(
        "✅  Connected to: {}",
        session.device_name().unwrap_or_default()
    );
    info!("Commands (type + Enter):");
    info!("  q             – quit");
    info!("  b             – battery level");
    info!("  v             – firmware version and git tag");
    info!("  :<n> <lua>    – run <lua> and collect <n> printed chunks");
    info!("  <any other>   – send as Lua, no response expected\n");

    // ── Stdin command loop ────────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread (to avoid holding a non-Send
    // StdinLock across await points) and relayed to the async side.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        if line.is_empty() {
            continue;
        }
        if !session.is_ready() {
            info!("❌  Disconnected from device.");
            break;
        }
        match line.as_str() {
            "q" => {
                info!("Quit requested.");
                break;
            }
            "b" => match session.battery_level().await {
                Ok(Some(level)) => println!("[BATTERY] {level:.0}%"),
                Ok(None) => println!("[BATTERY] no answer"),
                Err(e) => error!("Battery level error: {e}"),
            },
            "v" => {
                match session.firmware_version().await {
                    Ok(v) => println!("[FIRMWARE] {}", v.unwrap_or_else(|| "?".into())),
                    Err(e) => error!("Firmware version error: {e}"),
                }
                match session.git_tag().await {
                    Ok(t) => println!("[GIT TAG]  {}", t.unwrap_or_else(|| "?".into())),
                    Err(e) => error!("Git tag error: {e}"),
                }
            }
            cmd => match parse_chunked(cmd) {
                Some((expected, lua)) => match session.request_chunks(lua, expected).await {
                    Ok(chunks) => {
                        for (i, chunk) in chunks.iter().enumerate() {
                            println!("[{}/{expected}] {chunk}", i + 1);
                        }
                    }
                    Err(e) => error!("Request error: {e}"),
                },
                None => {
                    if let Err(e) = session.send(cmd).await {
                        error!("Send error: {e}");
                    }
                }
            },
        }
    }

    session.disconnect().await;
    info!("Command loop finished – exiting.");
    Ok(())
}

/// `":3 print(1) print(2) print(3)"` → `(3, "print(1) print(2) print(3)")`.
fn parse_chunked(line: &str) -> Option<(usize, &str)> {
    let rest = line.strip_prefix(':')?;
    let (count, lua) = rest.split_once(char::is_whitespace)?;
    Some((count.parse().ok()?, lua.trim()))
}
