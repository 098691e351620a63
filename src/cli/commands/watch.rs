//! Watch list commands.

use console::style;

use viewharvest::config::Settings;
use viewharvest::harvest::Runtime;

/// List watched subjects.
pub async fn cmd_watch_list(settings: &Settings) -> anyhow::Result<()> {
    let runtime = Runtime::from_settings(settings)?;
    let subjects = runtime.service.watched().await?;

    if subjects.is_empty() {
        println!("{} Watch list is empty", style("!").yellow());
        println!("  Add one with: viewharvest watch add <user>");
        return Ok(());
    }

    println!("\n{}", style("Watched subjects").bold());
    println!("{}", "-".repeat(40));
    for subject in &subjects {
        let last = runtime
            .service
            .cached(subject)
            .await?
            .map(|report| {
                format!(
                    "{} items, last harvest {}",
                    report.items.len(),
                    report.scraped_at.format("%Y-%m-%d %H:%M UTC")
                )
            })
            .unwrap_or_else(|| "never harvested".to_string());
        println!("  {:<24} {}", style(subject).cyan(), style(last).dim());
    }
    Ok(())
}

/// Add a subject to the watch list.
pub async fn cmd_watch_add(settings: &Settings, user: &str) -> anyhow::Result<()> {
    let runtime = Runtime::from_settings(settings)?;
    if runtime.service.watch(user).await? {
        println!("{} Watching '{}'", style("✓").green(), user);
    } else {
        println!("{} '{}' is already watched", style("!").yellow(), user);
    }
    Ok(())
}

/// Remove a subject and its baselines.
pub async fn cmd_watch_remove(settings: &Settings, user: &str) -> anyhow::Result<()> {
    let runtime = Runtime::from_settings(settings)?;
    if runtime.service.remove(user).await? {
        println!("{} Removed '{}' and its baselines", style("✓").green(), user);
        Ok(())
    } else {
        println!("{} '{}' is not on the watch list", style("✗").red(), user);
        anyhow::bail!("{} is not watched", user)
    }
}
