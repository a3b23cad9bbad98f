use crate::project::Project;

pub fn handle(project: &Project) -> anyhow::Result<()> {
    let graph = project.graph()?;
    print!("{}", graph.to_dot());
    Ok(())
}
