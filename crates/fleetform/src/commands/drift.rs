use crate::project::Project;
use crate::render;
use fleetform_cloud::{DriftDetector, StateStore};

/// Exit status when drift was found
const DRIFT_EXIT_CODE: i32 = 2;

pub async fn handle(project: &Project, json: bool) -> anyhow::Result<()> {
    let graph = project.graph()?;
    let state = project.store().load().await?;
    let cloud = project.cloud().await?;
    let providers = project.providers(&cloud);

    let report = DriftDetector::new(&project.registry, &providers)
        .with_retry(project.retry())
        .detect(&graph, &state)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        project.print_declaration();
        render::print_drift(&report);
    }

    if !report.is_clean() {
        std::process::exit(DRIFT_EXIT_CODE);
    }
    Ok(())
}
