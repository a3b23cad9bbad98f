use crate::commands::plan;
use crate::project::Project;
use crate::render;
use colored::Colorize;
use fleetform_cloud::{ApplyOptions, CancellationToken, Executor};
use std::io::Write;

pub async fn handle(
    project: &Project,
    parallelism: Option<usize>,
    json: bool,
    auto_approve: bool,
    refresh: bool,
) -> anyhow::Result<()> {
    if json && !auto_approve {
        anyhow::bail!("--json needs --auto-approve, there is no prompt to answer");
    }

    let plan = plan::build(project, refresh).await?;
    let pending = plan.has_changes() || plan.steps.iter().any(|s| s.metadata_only);

    if !json {
        project.print_declaration();
        if !pending {
            println!();
            println!(
                "{}",
                "No changes. Infrastructure matches the declarations.".green()
            );
            return Ok(());
        }
        render::print_plan(&plan);
    }

    if !auto_approve {
        println!();
        print!("Apply these changes? [y/N]: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Apply cancelled.".yellow());
            return Ok(());
        }
    }

    let cloud = project.cloud().await?;
    let providers = project.providers(&cloud);
    let store = project.store();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupt received; waiting for in-flight steps to finish...".yellow()
            );
            on_interrupt.cancel();
        }
    });

    let max_in_flight = parallelism.unwrap_or(project.settings.max_in_flight);
    let options = ApplyOptions::default()
        .with_max_in_flight(max_in_flight)
        .with_retry(project.retry())
        .with_cancel(cancel);

    if !json {
        println!();
        println!(
            "{}",
            format!("Applying with up to {} steps in flight...", max_in_flight).blue()
        );
    }

    let result = Executor::new(&providers, &store)
        .with_options(options)
        .apply(&plan)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        render::print_apply_result(&result);
    }

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
