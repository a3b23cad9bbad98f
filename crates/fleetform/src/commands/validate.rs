use crate::project::Project;
use colored::Colorize;
use std::collections::BTreeMap;

pub fn handle(project: &Project) -> anyhow::Result<()> {
    println!("{}", "Validating declarations...".blue());
    project.print_declaration();

    match project.graph() {
        Ok(graph) => {
            println!("{}", "✓ Declarations are valid".green().bold());
            println!();
            println!("Summary:");
            println!(
                "  resources: {}, dependencies: {}",
                graph.len(),
                graph.edges().len()
            );

            let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
            for node in graph.nodes() {
                *by_type.entry(node.address.resource_type.as_str()).or_default() += 1;
            }
            for (ty, count) in by_type {
                println!("    - {} ({})", ty.cyan(), count);
            }

            println!();
            println!("Apply order:");
            for (i, node) in graph.topological_order().iter().enumerate() {
                let mut line = format!("  {:>3}. {}", i + 1, node.address);
                if node.flags.deletion_protected {
                    line.push_str(&format!(" {}", "[deletion-protected]".yellow()));
                }
                println!("{}", line);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Validation failed".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
