use crate::project::Project;
use crate::render;
use colored::Colorize;
use fleetform_cloud::{Plan, Planner, StateStore};

/// Builds a plan against stored state, optionally refreshed from the cloud
pub async fn build(project: &Project, refresh: bool) -> anyhow::Result<Plan> {
    let graph = project.graph()?;
    let state = project.store().load().await?;
    let planner = Planner::new(&project.registry);

    if refresh {
        let cloud = project.cloud().await?;
        let providers = project.providers(&cloud);
        Ok(planner
            .plan_refreshed(&graph, &state, &providers, &project.retry())
            .await?)
    } else {
        Ok(planner.plan(&graph, &state)?)
    }
}

pub fn to_json(plan: &Plan) -> serde_json::Value {
    serde_json::json!({
        "state_serial": plan.state_serial,
        "summary": plan.summary(),
        "steps": plan.steps,
    })
}

pub async fn handle(project: &Project, json: bool, refresh: bool) -> anyhow::Result<()> {
    let plan = build(project, refresh).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&plan))?);
        return Ok(());
    }

    project.print_declaration();
    if !plan.has_changes() && !plan.steps.iter().any(|s| s.metadata_only) {
        println!();
        println!(
            "{}",
            "No changes. Infrastructure matches the declarations.".green()
        );
        return Ok(());
    }
    render::print_plan(&plan);
    Ok(())
}
