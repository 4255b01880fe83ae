use std::io::Write;
use std::process::exit;

use clap::{App, Arg};
use env_logger::Builder;
use log::{error, info, LevelFilter};

use bgpiped::config;
use bgpiped::reactor::Reactor;

/// Configuration fragment printed by --fi
const CONFIG_FRAGMENT: &str = r#"router_id = "1.1.1.1"
local_as = 65000

[api]
encoder = "json"
pipename = "bgpiped.sock"
cli = true

[[neighbors]]
peer_address = "10.0.0.1"
peer_as = 65001
families = ["ipv4 unicast", "ipv4 flow"]
routes = ["192.0.2.0/24 next-hop 10.0.0.2"]

[[processes]]
name = "watcher"
run = "/usr/local/bin/watcher"
encoder = "json"
neighbor_changes = true
receive = ["parsed"]
"#;

/// Usage fragment printed by --fu
const USAGE_FRAGMENT: &str = "\
bgpiped <configuration>          start the daemon
bgpiped -t <configuration>       validate the configuration and exit
bgpiped -e <configuration>       print the effective settings and exit
bgpiped -p <configuration>       pre-validate a configuration file
bgpiped -d <configuration>       start with debug logging";

/// Environment fragment printed by --fi-env / --fu-env
const ENV_FRAGMENT: &str = "\
every dotted option may be overridden from the environment:
  exabgp.tcp.port=1790        or  exabgp_tcp_port=1790
  exabgp.api.encoder=json     or  exabgp_api_encoder=json
  exabgp.log.level=debug      or  exabgp_log_level=debug
booleans accept true/enable/yes/1 and their negations";

fn main() {
    let matches = App::new("bgpiped")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Programmable BGP speaker with a helper-process API")
        .arg(
            Arg::new("configuration")
                .help("Path to the configuration file")
                .index(1),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Log at debug level"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .help("Validate the configuration and exit"),
        )
        .arg(
            Arg::new("env")
                .short('e')
                .long("env")
                .help("Print the effective settings and exit"),
        )
        .arg(
            Arg::new("pre-validate")
                .short('p')
                .long("validate")
                .takes_value(true)
                .value_name("FILE")
                .help("Pre-validate a configuration file and exit"),
        )
        .arg(
            Arg::new("run")
                .long("run")
                .takes_value(true)
                .value_name("COMMAND")
                .help("Add a helper process without declaring it in the configuration"),
        )
        .arg(Arg::new("fi").long("fi").help("Print a configuration example"))
        .arg(Arg::new("fu").long("fu").help("Print usage examples"))
        .arg(
            Arg::new("fi-env")
                .long("fi-env")
                .help("Print environment variable documentation"),
        )
        .arg(
            Arg::new("fu-env")
                .long("fu-env")
                .help("Print environment variable documentation"),
        )
        .get_matches();

    if matches.is_present("fi") {
        println!("{}", CONFIG_FRAGMENT);
        return;
    }
    if matches.is_present("fu") {
        println!("{}", USAGE_FRAGMENT);
        return;
    }
    if matches.is_present("fi-env") || matches.is_present("fu-env") {
        println!("{}", ENV_FRAGMENT);
        return;
    }

    let level = if matches.is_present("debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Builder::new()
        .filter(Some("bgpiped"), level)
        .filter(None, LevelFilter::Warn)
        .init();

    if let Some(path) = matches.value_of("pre-validate") {
        match config::from_file(path) {
            Ok(_) => {
                println!("configuration {} is valid", path);
                return;
            }
            Err(err) => {
                eprintln!("configuration {} is invalid: {}", path, err);
                exit(1);
            }
        }
    }

    let config_path = match matches.value_of("configuration") {
        Some(path) => path.to_string(),
        None => {
            eprintln!("a configuration file is required (see --help)");
            exit(1);
        }
    };

    let mut config = match config::from_file(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("could not load {}: {}", config_path, err);
            exit(1);
        }
    };

    if matches.is_present("test") {
        println!("configuration {} is valid", config_path);
        return;
    }
    if matches.is_present("env") {
        for (key, value) in config::dotted_settings(&config) {
            println!("{} = '{}'", key, value);
        }
        return;
    }

    if let Some(run) = matches.value_of("run") {
        config.processes.push(bgpiped::config::ProcessConfig {
            name: "run".to_string(),
            run: run.to_string(),
            encoder: config.api.encoder.clone(),
            subscriptions: Default::default(),
        });
    }

    let pid_path = config.pid.clone();
    if let Some(path) = &pid_path {
        match std::fs::File::create(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
            }
            Err(err) => {
                eprintln!("could not write pid file {}: {}", path, err);
                exit(1);
            }
        }
    }

    info!(
        "starting bgpiped {} with {} neighbors",
        env!("CARGO_PKG_VERSION"),
        config.neighbors.len()
    );

    // one cooperative execution context: everything runs on this thread
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("could not start runtime: {}", err);
            exit(1);
        }
    };

    let result = runtime.block_on(async {
        let reactor = Reactor::new(config, config_path)?;
        reactor.run().await
    });

    if let Some(path) = &pid_path {
        let _ = std::fs::remove_file(path);
    }

    if let Err(err) = result {
        error!("reactor failed: {}", err);
        exit(1);
    }
}
