//! Simulator entrypoint: one OS worker thread per rank.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    match try_run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause
            .downcast_ref::<sim_partition::UnsupportedRankCount>()
            .is_some()
        {
            return 2;
        }
        if cause.downcast_ref::<sim_map::MapFormatError>().is_some()
            || cause
                .downcast_ref::<sim_bootstrap::AgentFormatError>()
                .is_some()
        {
            return 3;
        }
    }
    1
}

struct Startup {
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl Startup {
    fn new() -> Self {
        let log_guard = sim_config::configure_logging();
        sim_config::install_panic_hook();
        Self {
            _log_guard: log_guard,
        }
    }
}

fn try_run() -> anyhow::Result<()> {
    let _startup = Startup::new();

    let args = sim_config::parse_args()?;
    let config = sim_config::RunConfig::apply_context(args);

    let map = Arc::new(
        sim_map::Map::load(&config.map_path)
            .with_context(|| format!("loading map file {}", config.map_path.display()))?,
    );
    let partitioner = Arc::new(sim_partition::Partitioner::new(config.ranks)?);

    let agents = match &config.pin_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading agent pin file {}", path.display()))?;
            sim_bootstrap::parse_agent_file(&text, config.pin_count)?
        }
        None => Vec::new(),
    };

    let full_population =
        sim_bootstrap::bootstrap_particles(&map, &agents, config.random_count, config.seed)?;

    info!(
        target: "runtime.startup",
        ranks = config.ranks,
        particles = full_population.len(),
        steps = config.steps,
        "bootstrap_complete"
    );

    let n_total = full_population.len();
    let cutoff = sim_force::CUTOFF;
    let world_size = 1.0;
    let raster_denom = map.rasterization_denominator();

    let comms = sim_comm::ChannelComm::mesh(config.ranks);
    let mut results: Vec<anyhow::Result<()>> = Vec::with_capacity(config.ranks);

    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let map = Arc::clone(&map);
                let partitioner = Arc::clone(&partitioner);
                let rank = comm.rank();
                let population = if rank == 0 {
                    Some(full_population.clone())
                } else {
                    None
                };
                let output = config.output.clone();
                let steps_limit = config.steps;

                scope.spawn(move || -> anyhow::Result<()> {
                    let owned = sim_bootstrap::scatter(population, &partitioner, &comm)?;
                    let mut state = sim_stepper::RankState::new(map, partitioner, comm, owned);

                    let mut writer = if rank == 0 {
                        Some(make_writer(
                            output.as_deref(),
                            n_total,
                            cutoff,
                            world_size,
                            raster_denom,
                        )?)
                    } else {
                        None
                    };

                    let mut step_count = 0u64;
                    loop {
                        if steps_limit != 0 && step_count >= steps_limit {
                            break;
                        }
                        let gathered = state.tick()?;
                        if let (Some(writer), Some(records)) = (writer.as_mut(), gathered) {
                            writer.write_frame(&records)?;
                        }
                        step_count += 1;
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            results.push(handle.join().unwrap_or_else(|panic| {
                Err(anyhow::anyhow!("worker thread panicked: {panic:?}"))
            }));
        }
    });

    for result in results {
        result?;
    }
    Ok(())
}

fn make_writer(
    output: Option<&Path>,
    n: usize,
    cutoff: f64,
    world_size: f64,
    raster_denom: usize,
) -> anyhow::Result<sim_snapshot::SnapshotWriter<Box<dyn Write + Send>>> {
    let sink: Box<dyn Write + Send> = match output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("creating snapshot output {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    Ok(sim_snapshot::SnapshotWriter::new(
        sink,
        n,
        cutoff,
        world_size,
        raster_denom,
    ))
}

