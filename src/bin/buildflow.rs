//! Runs a build from a manifest, or the bundled Java pipeline demo.
//!
//! Usage: `buildflow [MANIFEST] [TARGET]`

use anyhow::{Context, Result};
use buildflow::{BuildManifest, BuildScheduler, DependencyGraph, NodeOutcome};
use tracing::{info, Level};

fn demo_graph() -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for name in [
        "Compile Java",
        "Compile Resources",
        "Run Tests",
        "Package JAR",
        "Deploy",
    ] {
        graph.add_node(name)?;
    }
    graph.add_dependency("Compile Java", "Run Tests")?;
    graph.add_dependency("Compile Resources", "Package JAR")?;
    graph.add_dependency("Run Tests", "Package JAR")?;
    graph.add_dependency("Package JAR", "Deploy")?;
    Ok(graph)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let mut args = std::env::args().skip(1);
    let (scheduler, target) = match args.next() {
        Some(path) => {
            let manifest = BuildManifest::load_file(&path)
                .with_context(|| format!("loading manifest {}", path))?;
            let scheduler = BuildScheduler::from_manifest(manifest)?;
            (scheduler, args.next())
        }
        None => {
            let scheduler = BuildScheduler::new(demo_graph()?)?;
            scheduler.mark_changed("Compile Java");
            scheduler.mark_changed("Compile Resources");
            (scheduler, Some("Compile Java".to_string()))
        }
    };

    for component in scheduler.get_nodes() {
        println!("{}\n", component);
    }

    let report = match target {
        Some(target) => scheduler.build(&target).await?,
        None => scheduler.build_all_changed().await?,
    };

    for node in &report.nodes {
        let status = match &node.outcome {
            NodeOutcome::Built => "built".to_string(),
            NodeOutcome::Skipped => "skipped".to_string(),
            NodeOutcome::Failed { error } => format!("failed: {}", error),
            NodeOutcome::Blocked { dependency } => format!("blocked by {}", dependency),
            NodeOutcome::Interrupted { reason } => format!("interrupted: {}", reason),
        };
        println!("{:<20} {} ({}ms)", node.component, status, node.duration_ms);
    }

    let status = scheduler.shutdown().await;
    info!("Shutdown: {:?}", status);

    if !report.overall_success {
        anyhow::bail!("build {} did not succeed", report.run_id);
    }
    Ok(())
}
