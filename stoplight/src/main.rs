//! Run the stoplight simulation on a freshly booted kernel.
use clap::{App, Arg, value_t};
use core::sync::atomic::Ordering;
use kestrel::{
    Kernel, SystemConfigurationBuilder,
    thread::scheduler::{Lottery, RoundRobin},
    util::random::Lcg,
};
use stoplight::simulation::{self, SimulationConfig, SimulationError};

fn main() {
    let matches = App::new("stoplight")
        .about("Drives random vehicles through a three-way intersection.")
        .arg(
            Arg::with_name("vehicles")
                .long("vehicles")
                .takes_value(true)
                .default_value("20")
                .help("Number of vehicles"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .takes_value(true)
                .default_value("24301")
                .help("Seed of the vehicle draws and of the scheduler"),
        )
        .arg(
            Arg::with_name("scheduler")
                .long("scheduler")
                .takes_value(true)
                .possible_values(&["fifo", "rr", "lottery"])
                .default_value("fifo"),
        )
        .arg(
            Arg::with_name("synchprobs")
                .long("synchprobs")
                .help("Yield a random number of times before each vehicle starts"),
        )
        .arg(
            Arg::with_name("quiet")
                .long("quiet")
                .help("Silence kernel logs"),
        )
        .get_matches();

    let vehicles = value_t!(matches, "vehicles", usize).unwrap_or_else(|e| e.exit());
    let seed = value_t!(matches, "seed", u64).unwrap_or_else(|e| e.exit());
    if matches.is_present("quiet") {
        kestrel::QUITE.store(true, Ordering::SeqCst);
    }

    let builder = SystemConfigurationBuilder::new()
        .seed(seed)
        .synch_probs(matches.is_present("synchprobs"));
    let builder = match matches.value_of("scheduler") {
        Some("rr") => builder.set_scheduler(RoundRobin::new(5)),
        Some("lottery") => builder.set_scheduler(Lottery::new(seed, 4)),
        _ => builder,
    };

    let kernel = Kernel::bootstrap(builder.build());
    let config = SimulationConfig {
        vehicles,
        ..SimulationConfig::default()
    };
    match simulation::run(&config, &mut Lcg::new(seed)) {
        Ok(_) => (),
        Err(SimulationError::Fork(e)) => panic!("approachintersection: thread_fork failed: {e:?}"),
        Err(e) => panic!("stoplight: {e:?}"),
    }
    kernel.shutdown();
}
