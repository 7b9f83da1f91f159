extern crate chan_signal;
extern crate chrono;
extern crate env_logger;
extern crate getopts;
#[macro_use]
extern crate log;
extern crate ota;

use chan_signal::Signal;
use chrono::Utc;
use env_logger::LogBuilder;
use getopts::Options;
use log::{LogLevelFilter, LogRecord};
use std::{env, process, thread};
use std::time::Duration;

use ota::client::{self, OtaClient, UpdateCheck};
use ota::datatype::Config;
use ota::download::FlowControlToken;
use ota::http::{AuthClient, TlsClient};
use ota::keys::KeyManager;
use ota::pacman::PacMan;
use ota::storage::FileStorage;


macro_rules! exit {
    ($code:expr, $tag:expr, $fmt:expr, $($arg:tt)*) => {{
        println!(concat!("{}: ", $fmt), $tag, $($arg)*);
        process::exit($code);
    }}
}


fn main() {
    let version = start_logging();
    let config = build_config(&version);

    let signal = chan_signal::notify(&[Signal::INT, Signal::TERM]);
    thread::spawn(move || {
        signal.recv();
        info!("interrupted, exiting");
        process::exit(130);
    });

    let timeout = Duration::from_secs(config.network.timeout_sec);
    let storage = Box::new(FileStorage::new(&config.device.storage_path));
    let mut keys = KeyManager::new(config.device.runtime_path.clone());
    match keys.load_tls_creds(&*storage) {
        Ok(true)  => TlsClient::init(keys.tls_data()),
        Ok(false) => TlsClient::init(None),
        Err(err)  => exit!(2, "provisioning", "couldn't load TLS credentials: {}", err)
    }

    let client = Box::new(AuthClient::new(timeout));
    let secondaries = client::build_secondaries(&config, &*storage, timeout);
    let pacman = PacMan::File { images_dir: format!("{}/images", config.device.storage_path) };
    let mut ota = OtaClient::new(&config, storage, client, keys, pacman, secondaries);

    if let Err(err) = ota.initialize() {
        exit!(2, "provisioning", "{}", err);
    }
    if let Err(err) = ota.attempt_provision() {
        exit!(2, "provisioning", "{}", err);
    }

    let token = FlowControlToken::default();
    let targets = match ota.fetch_meta() {
        Ok(UpdateCheck::NoUpdatesAvailable) => {
            info!("no updates available");
            match ota.put_manifest() {
                Ok(()) => process::exit(0),
                Err(err) => exit!(6, "report", "{}", err)
            }
        }
        Ok(UpdateCheck::UpdatesAvailable(targets)) => {
            info!("{} updates available", targets.len());
            targets
        }
        Err(err) => exit!(3, "metadata", "{}", err)
    };

    if let Err(err) = ota.download_images(&targets, &token) {
        exit!(4, "download", "{}", err);
    }

    let reports = match ota.uptane_install(&targets) {
        Ok(reports) => reports,
        Err(err) => exit!(5, "install", "{}", err)
    };
    let all_ok = reports.iter().all(|&(_, ref outcome)| outcome.is_success());
    for &(ref serial, ref outcome) in &reports {
        info!("install result for {}: {} {}", serial, outcome.code, outcome.detail);
    }

    if let Err(err) = ota.put_manifest() {
        exit!(6, "report", "{}", err);
    }

    if all_ok {
        process::exit(0);
    } else {
        exit!(5, "install", "{} ecus reported failures",
              reports.iter().filter(|&&(_, ref outcome)| !outcome.is_success()).count());
    }
}

fn start_logging() -> String {
    let version = option_env!("OTA_VERSION").unwrap_or("unknown");

    let mut builder = LogBuilder::new();
    builder.format(move |record: &LogRecord| {
        format!("{} ({}): {} - {}", Utc::now().format("%FT%TZ"), version, record.level(), record.args())
    });
    builder.filter(Some("hyper"), LogLevelFilter::Info);
    builder.parse(&env::var("RUST_LOG").unwrap_or("INFO".to_string()));
    builder.init().expect("builder already initialized");

    version.to_string()
}

fn build_config(version: &str) -> Config {
    let args     = env::args().collect::<Vec<String>>();
    let program  = args[0].clone();
    let mut opts = Options::new();

    opts.optflag("h", "help", "print this help menu then quit");
    opts.optflag("p", "print", "print the parsed config then quit");
    opts.optflag("v", "version", "print the version then quit");
    opts.optopt("c", "config", "change config path", "PATH");

    let matches = opts.parse(&args[1..]).unwrap_or_else(|err| panic!("{}", err));

    if matches.opt_present("help") {
        println!("{}", opts.usage(&format!("Usage: {} [options]", program)));
        process::exit(0);
    } else if matches.opt_present("version") {
        println!("{}", version);
        process::exit(0);
    }

    let config = match matches.opt_str("config").or_else(|| env::var("OTA_CONFIG").ok()) {
        Some(file) => Config::load(&file).unwrap_or_else(|err| {
            println!("couldn't load config: {}", err);
            process::exit(1);
        }),
        None => {
            warn!("No config file given. Falling back to defaults.");
            Config::default()
        }
    };

    if matches.opt_present("print") {
        println!("{:#?}", config);
        process::exit(0);
    }

    config
}
