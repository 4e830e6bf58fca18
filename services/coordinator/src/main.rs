//! Coordinator service: recovers the working set from storage, runs the
//! persistence writer and the file exchange, and owns the scheduler that
//! the HTTPS transport mounts `kiln::gateway` on.

use clap::{App, Arg};
use hearth::config::Configuration;
use hearth::logging::{self, info, o};
use kiln::recovery;
use kiln::scheduler::Scheduler;
use kiln::store::EffectWriter;
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

mod store;

use store::SqliteStore;

fn main() {
    let matches = App::new("Render Coordinator")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs the render farm coordinator.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file")
                .required(true),
        )
        .get_matches();

    let config_path = matches.value_of("CONFIG_FILE").unwrap();

    let log = logging::init();

    let mut config =
        Configuration::load(Path::new(config_path)).expect("Error loading config file");

    info!(log, "starting coordinator";
          "storage" => %config.folder.display(),
          "store" => %config.db_name.display());

    // Start-up storage failures are fatal; everything after this point
    // degrades to logged errors instead.
    let mut sqlite =
        SqliteStore::open(&config.db_name, &log).expect("Error opening row store");

    let seeded = recovery::seed(&mut sqlite, &log).expect("Error seeding registry");

    for key in &seeded.node_keys {
        config.admit_key(key);
    }

    info!(log, "client keys admitted"; "count" => config.user_api_keys.len());

    let writer = EffectWriter::spawn(Box::new(sqlite), &log);

    let scheduler = Scheduler::new(
        seeded.registry.clone(),
        config.clone(),
        writer.sink(),
        &log,
    );

    // The TLS transport (external to this service core) mounts
    // `kiln::gateway::handle` over this scheduler using the
    // `<certname>.cert`/`<certname>.key` pair.
    info!(log, "gateway ready"; "cert" => &config.certname);

    let listener = TcpListener::bind(("0.0.0.0", freight::DEFAULT_PORT))
        .expect("Error binding file exchange port");
    let stop = Arc::new(AtomicBool::new(false));

    freight::server::serve(
        listener,
        config.folder.clone(),
        stop,
        log.new(o!("component" => "freight")),
    );

    drop(scheduler);
    writer.shutdown();
}
