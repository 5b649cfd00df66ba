use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_authors, crate_version, App as ClapApp, Arg, ArgMatches};
use env_logger::Env;
use tokio::io::BufReader;
use tokio::runtime::Runtime;

use benchctl::address::Address;
use benchctl::app::App;
use benchctl::controller::{
    BenchConfig, InstrumentController, Role, DEFAULT_DIMMING, DEFAULT_METER, DEFAULT_SCOPE, DEFAULT_SUPPLY,
    DEFAULT_TIMEOUT,
};
use benchctl::discovery;
use benchctl::shell;
use benchctl::transport::sim::{DriverModel, SimBench};
use benchctl::transport::visa::{VisaResourceManager, DEFAULT_VISA_LIB};
use benchctl::transport::ResourceManager;

fn timeout_arg() -> Arg<'static> {
    Arg::new("timeout-ms")
        .long("timeout-ms")
        .takes_value(true)
        .default_value("5000")
        .help("I/O timeout per instrument in milliseconds.")
}

fn json_arg() -> Arg<'static> {
    Arg::new("json").long("json").help("Print results as JSON lines.")
}

fn address_arg(name: &'static str, default: &'static str, help: &'static str) -> Arg<'static> {
    Arg::new(name).long(name).takes_value(true).default_value(default).help(help)
}

fn parse_timeout(matches: &ArgMatches) -> Duration {
    let value = matches.value_of("timeout-ms").unwrap_or("5000");
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Duration::from_millis(ms),
        _ => {
            println!("Cannot parse `{}` as a timeout in milliseconds.", value);
            exit(1);
        }
    }
}

fn bench_config(matches: &ArgMatches) -> BenchConfig {
    let mut config = BenchConfig {
        timeout: parse_timeout(matches),
        ..BenchConfig::default()
    };
    for role in &Role::ALL {
        let key = match role {
            Role::Supply => "supply",
            Role::Meter => "meter",
            Role::Dimming => "dimming",
            Role::Scope => "scope",
        };
        let value = matches.value_of(key).unwrap_or_else(|| config.address(*role));
        let addr = match Address::parse(value) {
            Ok(addr) => String::from(addr),
            Err(err) => {
                println!("Invalid address for the {}: {}", role.name(), err);
                exit(1);
            }
        };
        match role {
            Role::Supply => config.supply = addr,
            Role::Meter => config.meter = addr,
            Role::Dimming => config.dimming = addr,
            Role::Scope => config.scope = addr,
        }
    }
    config
}

fn resource_manager(matches: &ArgMatches, config: &BenchConfig) -> Arc<dyn ResourceManager> {
    if matches.is_present("simulate") {
        log::info!("Using the simulated bench");
        return Arc::new(SimBench::led_driver(config, DriverModel::default()));
    }
    let path = matches.value_of("visa-lib").unwrap_or(DEFAULT_VISA_LIB);
    match VisaResourceManager::load(path) {
        Ok(rm) => Arc::new(rm),
        Err(err) => {
            println!("Cannot create the VISA resource manager: {}", err);
            println!(" - Check that a VISA implementation is installed or pass --visa-lib.");
            exit(1);
        }
    }
}

fn main() {
    let matches = ClapApp::new("LED driver bench control")
        .author(crate_authors!())
        .version(crate_version!())
        .about("Check GPIB instruments and test LED drivers")
        .arg(Arg::new("verbose").long("verbose").short('v').help("Log verbose output"))
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .help("Use a simulated bench instead of VISA."),
        )
        .arg(
            Arg::new("visa-lib")
                .long("visa-lib")
                .takes_value(true)
                .help("Path to the VISA shared library."),
        )
        .subcommand(
            ClapApp::new("discover")
                .about("List instruments and check that every GPIB instrument identifies itself")
                .arg(timeout_arg())
                .arg(json_arg()),
        )
        .subcommand(
            ClapApp::new("led")
                .about("Run the LED driver test console")
                .arg(address_arg("supply", DEFAULT_SUPPLY, "Address of the main supply."))
                .arg(address_arg("meter", DEFAULT_METER, "Address of the multimeter."))
                .arg(address_arg("dimming", DEFAULT_DIMMING, "Address of the dimming supply."))
                .arg(address_arg("scope", DEFAULT_SCOPE, "Address of the oscilloscope."))
                .arg(timeout_arg())
                .arg(json_arg()),
        )
        .subcommand_required(true)
        .get_matches();

    if matches.is_present("verbose") {
        env_logger::Builder::from_env(Env::default().default_filter_or("benchctl=debug")).init();
    } else {
        env_logger::init();
    }

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            println!("Cannot start the async runtime: {}", err);
            exit(1);
        }
    };

    let code = match matches.subcommand() {
        Some(("discover", sub)) => {
            let timeout = parse_timeout(sub);
            let manager = resource_manager(&matches, &BenchConfig::default());
            rt.block_on(run_discover(manager, timeout, sub.is_present("json")))
        }
        Some(("led", sub)) => {
            let config = bench_config(sub);
            let manager = resource_manager(&matches, &config);
            rt.block_on(run_led(manager, config, sub.is_present("json")))
        }
        _ => 2,
    };
    log::debug!("Application quitting.");
    exit(code);
}

async fn run_discover(manager: Arc<dyn ResourceManager>, timeout: Duration, json: bool) -> i32 {
    match discovery::discover(manager.as_ref(), timeout).await {
        Ok(report) => {
            if json {
                match serde_json::to_string(&report) {
                    Ok(x) => println!("{}", x),
                    Err(err) => {
                        println!("Cannot serialize the report: {}", err);
                        return 1;
                    }
                }
            } else {
                println!("{}", report);
            }
            if report.all_responded() {
                0
            } else {
                1
            }
        }
        Err(err) => {
            println!("Cannot enumerate instruments: {}", err);
            1
        }
    }
}

async fn run_led(manager: Arc<dyn ResourceManager>, config: BenchConfig, json: bool) -> i32 {
    if config.timeout != DEFAULT_TIMEOUT {
        log::info!("Using an I/O timeout of {} ms", config.timeout.as_millis());
    }
    let mut app = App::new(InstrumentController::new(manager, config));
    let stdin = BufReader::new(tokio::io::stdin());
    match shell::run(&mut app, stdin, tokio::io::stdout(), json).await {
        Ok(()) => 0,
        Err(err) => {
            println!("Console error: {}", err);
            1
        }
    }
}
