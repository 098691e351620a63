//! One-shot harvest command.

use console::style;
use serde_json::json;

use viewharvest::config::Settings;
use viewharvest::harvest::Runtime;

/// Harvest a subject, print the annotated items as JSON.
pub async fn cmd_harvest(
    settings: &Settings,
    user: &str,
    count: Option<usize>,
    reset: bool,
) -> anyhow::Result<()> {
    let runtime = Runtime::from_settings(settings)?;
    let service = runtime.service;

    eprintln!(
        "{} Harvesting {} via {}...",
        style("→").cyan(),
        style(user).bold(),
        service.transport()
    );

    let result = service.refresh(user, count, reset).await;
    service.shutdown().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} Harvest failed: {}", style("✗").red(), e);
            return Err(e.into());
        }
    };

    eprintln!(
        "{} {} items{}",
        style("✓").green(),
        report.items.len(),
        if reset { " (baseline reset)" } else { "" }
    );

    let output = json!({
        "user": report.subject,
        "totalVideos": report.items.len(),
        "scrapedAt": report.scraped_at.to_rfc3339(),
        "videos": report.items,
        "isCached": report.cached,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
