//! Refresh-all command.

use console::style;

use viewharvest::config::Settings;
use viewharvest::harvest::Runtime;

/// Refresh every watched subject once and summarize the outcome.
pub async fn cmd_refresh(settings: &Settings, reset: bool) -> anyhow::Result<()> {
    let runtime = Runtime::from_settings(settings)?;
    let service = runtime.service;

    println!(
        "{} Refreshing watched subjects{}",
        style("→").cyan(),
        if reset { " (baseline reset)" } else { "" }
    );

    let outcomes = service.refresh_all(reset).await?;
    service.shutdown().await;

    if outcomes.is_empty() {
        println!("{} Watch list is empty", style("!").yellow());
        return Ok(());
    }

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(count) => println!(
                "  {} {:<24} {} items",
                style("✓").green(),
                outcome.subject,
                count
            ),
            Err(e) => {
                failed += 1;
                println!("  {} {:<24} {}", style("✗").red(), outcome.subject, e);
            }
        }
    }

    println!(
        "\n{} {} refreshed, {} failed",
        style("Done:").bold(),
        outcomes.len() - failed,
        failed
    );
    Ok(())
}
