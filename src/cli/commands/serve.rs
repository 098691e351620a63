//! Web server command.

use console::style;

use viewharvest::config::Settings;
use viewharvest::harvest::Runtime;
use viewharvest::scheduler::Scheduler;
use viewharvest::server::{self, AppState};

/// Start the web server, and the scheduler unless disabled.
pub async fn cmd_serve(
    settings: &Settings,
    bind: Option<&str>,
    with_scheduler: bool,
) -> anyhow::Result<()> {
    let addr = parse_bind_address(bind.unwrap_or(&settings.bind))?;
    let runtime = Runtime::from_settings(settings)?;

    let scheduler = if with_scheduler {
        println!(
            "{} Scheduler: refresh every {} min, daily reset at {}",
            style("→").cyan(),
            settings.refresh_interval.as_secs() / 60,
            settings.daily_reset_at.format("%H:%M")
        );
        Some(Scheduler::from_settings(runtime.service.clone(), settings).spawn())
    } else {
        println!("{} Scheduler disabled", style("!").yellow());
        None
    };

    println!(
        "{} Starting viewharvest at http://{} ({} transport)",
        style("→").cyan(),
        addr,
        runtime.service.transport()
    );
    println!("  Press Ctrl+C to stop");

    let service = runtime.service.clone();
    let result = server::serve(AppState::from(runtime), &addr).await;

    if let Some(handle) = scheduler {
        handle.shutdown().await;
    }
    service.shutdown().await;
    result
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> 127.0.0.1:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:3030
/// - Host and port: "0.0.0.0:3030" -> 0.0.0.0:3030
fn parse_bind_address(bind: &str) -> anyhow::Result<String> {
    let bind = bind.trim();
    if bind.is_empty() {
        anyhow::bail!("empty bind address");
    }

    if let Ok(port) = bind.parse::<u16>() {
        return Ok(format!("127.0.0.1:{}", port));
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok(format!("{}:{}", host, port));
        }
    }

    Ok(format!("{}:3030", bind))
}
