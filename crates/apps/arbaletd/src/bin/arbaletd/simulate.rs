use arbalet_daemon::simulation::Simulation;
use arbalet_mesh::NodeConfig;
use std::collections::HashMap;
use std::time::Duration;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub(super) async fn run(nodes: usize, server: String) -> anyhow::Result<()> {
    let template = NodeConfig { startup_delay_ms: 500, ..NodeConfig::default() };
    let simulation = Simulation::spawn(nodes, &server, &template)?;
    let mut last = HashMap::new();
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = ticker.tick() => {
                for (address, status) in simulation.statuses() {
                    if last.insert(address, status) != Some(status) {
                        log::info!(
                            "[simulate] {} {} members={} seq={} asleep={}",
                            address,
                            status.state,
                            status.members,
                            status.sequence,
                            status.asleep
                        );
                    }
                }
            }
        }
    }

    let grace = template.shutdown_grace();
    simulation.shutdown(grace).await?;
    Ok(())
}
