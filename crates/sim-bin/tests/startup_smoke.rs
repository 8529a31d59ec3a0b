use std::io::Write;
use std::sync::Arc;

use sim_comm::ChannelComm;
use sim_map::Map;
use sim_partition::Partitioner;

// Exercises the same load -> bootstrap -> scatter -> tick wiring try_run
// performs, against real on-disk fixtures, without spawning the process.
#[test]
fn pinned_agents_bootstrap_and_tick_across_four_ranks() {
    let dir = tempfile::tempdir().unwrap();

    let map_path = dir.path().join("map.cfg");
    let mut map_file = std::fs::File::create(&map_path).unwrap();
    writeln!(map_file, "h 4").unwrap();
    writeln!(map_file, "w 4").unwrap();
    for _ in 0..4 {
        writeln!(map_file, "1111").unwrap();
    }
    drop(map_file);

    let agents_path = dir.path().join("agents.txt");
    let mut agents_file = std::fs::File::create(&agents_path).unwrap();
    writeln!(agents_file, "0.1,0.1,0.9,0.9").unwrap();
    writeln!(agents_file, "0.9,0.9,0.1,0.1").unwrap();
    drop(agents_file);

    let map = Arc::new(Map::load(&map_path).unwrap());
    let partitioner = Arc::new(Partitioner::new(4).unwrap());

    let agent_text = std::fs::read_to_string(&agents_path).unwrap();
    let agents = sim_bootstrap::parse_agent_file(&agent_text, 2).unwrap();
    let population = sim_bootstrap::bootstrap_particles(&map, &agents, 0, 1).unwrap();
    assert_eq!(population.len(), 2);

    let comms = ChannelComm::mesh(4);
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let map = Arc::clone(&map);
                let partitioner = Arc::clone(&partitioner);
                let rank = comm.rank();
                let population = if rank == 0 {
                    Some(population.clone())
                } else {
                    None
                };
                scope.spawn(move || {
                    let owned = sim_bootstrap::scatter(population, &partitioner, &comm).unwrap();
                    let mut state = sim_stepper::RankState::new(map, partitioner, comm, owned);
                    for _ in 0..5 {
                        state.tick().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });
}

#[test]
fn bad_map_file_is_rejected_before_any_rank_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("map.cfg");
    std::fs::write(&map_path, "h 2\nw 2\nxx\nxx\n").unwrap();

    let err = Map::load(&map_path).unwrap_err();
    assert!(matches!(err, sim_map::MapFormatError::InvalidCell { .. }));
}
