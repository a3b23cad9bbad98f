use crate::project::Project;
use colored::Colorize;
use fleetform_cloud::StateStore;
use fleetform_cloud::action::redact;
use fleetform_core::ResourceAddress;

pub async fn list(project: &Project) -> anyhow::Result<()> {
    let store = project.store();
    let state = store.load().await?;

    if state.is_empty() {
        println!("{}", "No resources in state".dimmed());
        return Ok(());
    }

    println!(
        "{:<40} {:<28} {:>7}  {}",
        "ADDRESS".bold(),
        "ID".bold(),
        "VERSION".bold(),
        "UPDATED".bold()
    );
    for record in state.records() {
        let mut address = record.address().to_string();
        if record.flags.deletion_protected {
            address.push_str(" 🔒");
        }
        println!(
            "{:<40} {:<28} {:>7}  {}",
            address.cyan(),
            record.id,
            record.version,
            record.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} resources, state serial {}", state.len(), state.serial);

    if let Some(lock) = store.lock_info().await? {
        println!(
            "{} held by {} since {} (token {})",
            "State is locked:".yellow(),
            lock.holder,
            lock.acquired_at,
            lock.token
        );
    }
    Ok(())
}

pub async fn show(project: &Project, address: &str) -> anyhow::Result<()> {
    let address: ResourceAddress = address.parse()?;
    let state = project.store().load().await?;
    let record = state
        .get(&address)
        .ok_or_else(|| anyhow::anyhow!("{} is not in state", address))?;

    // unknown types are hidden entirely
    let ty = project.registry.describe(&record.resource_type).ok();
    let attributes = redact(&record.attributes, |k| {
        ty.is_none_or(|t| t.is_sensitive(k))
    });

    println!("{}", address.to_string().cyan().bold());
    println!("  id:         {}", record.id);
    println!("  version:    {}", record.version);
    println!("  created:    {}", record.created_at);
    println!("  updated:    {}", record.updated_at);
    if record.flags.deletion_protected {
        println!("  protected:  {}", "deletion-protected".yellow());
    }
    if let Some(strategy) = record.flags.replace_strategy {
        println!("  replace:    {}", strategy);
    }
    if !record.dependencies.is_empty() {
        let deps: Vec<String> = record.dependencies.iter().map(|d| d.to_string()).collect();
        println!("  depends on: {}", deps.join(", "));
    }
    println!("  attributes:");
    for (key, value) in &attributes {
        println!("    {} = {}", key, value);
    }
    Ok(())
}

pub async fn force_unlock(project: &Project, token: &str) -> anyhow::Result<()> {
    project.store().force_unlock(token).await?;
    println!("{}", "✓ State lock released".green());
    Ok(())
}
