mod cli;
mod config;

use std::net::ToSocketAddrs;
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use anidb_cache::CacheStore;
use anidb_pipeline::{
    GetFileInfoOperation, HashOperation, MylistAddOperation, Operation, OperationContext, Pipeline,
    Record, RenameConfig, RenameMode, RenameOperation,
};
use anidb_transport::{Engine, EngineConfig, PathsConfig};

use cli::{ApiArgs, Cli, Command, Ed2kArgs};
use config::Config;

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Ed2k(args) => run_ed2k(args),
        Command::Api(args) => run_api(args),
    };
    std::process::exit(exit_code);
}

fn run_ed2k(args: Ed2kArgs) -> i32 {
    let mut had_error = false;
    for path in &args.files {
        match anidb_hash::hash_file(path) {
            Ok(hash) => {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
                println!("ed2k://|file|{name}|{}|{}|", hash.size, hash.ed2k);
            }
            Err(e) => {
                log::error!("failed to hash {}: {e}", path.display());
                had_error = true;
            }
        }
    }
    if args.clipboard {
        log::warn!("clipboard support is not available in this build; links were printed instead");
    }
    if had_error {
        1
    } else {
        0
    }
}

fn run_api(args: ApiArgs) -> i32 {
    let paths = PathsConfig::resolve();
    if let Err(e) = paths.ensure_dir() {
        log::error!("failed to create config directory: {e}");
        return 1;
    }
    let config = match Config::load(&paths.config_dir) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load configuration: {e}");
            return 1;
        }
    };

    let records: Vec<Record> = args.files.iter().cloned().map(Record::new).collect();
    if records.is_empty() {
        log::warn!("no files given");
        return 0;
    }

    if args.suppress_network_activity {
        return run_hash_only(records);
    }

    let mut cache = match CacheStore::open(paths.cache_path()) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to open cache store: {e}");
            return 1;
        }
    };

    let server_addr = match format!("{}:{}", config.server_host, config.server_port).to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(a) => a,
            None => {
                log::error!("could not resolve {}", config.server_host);
                return 1;
            }
        },
        Err(e) => {
            log::error!("DNS resolution failed: {e}");
            return 1;
        }
    };
    let local_addr = "0.0.0.0:0".parse().expect("static address is valid");

    let mut engine = match Engine::connect(
        EngineConfig {
            server_addr,
            local_addr,
            username: args.username.clone(),
            password: args.password.clone(),
            api_key: args.apikey.clone(),
            client_name: config.client_name.clone(),
            client_version: config.client_version,
            persistent_session: args.persistent,
        },
        paths.clone(),
    ) {
        Ok(e) => e,
        Err(e) => {
            log::error!("failed to connect: {e}");
            return 1;
        }
    };

    if let Err(e) = engine.ensure_encrypted() {
        log::error!("encryption handshake failed: {e}");
        return 1;
    }

    let mut operations: Vec<Box<dyn Operation>> = vec![Box::new(HashOperation)];
    if args.add {
        operations.push(Box::new(MylistAddOperation {
            viewed: !args.unwatched,
            state: args.state.unwrap_or(0),
            edit: false,
        }));
    }
    operations.push(Box::new(GetFileInfoOperation { field_names: default_field_names(&args) }));

    if let Some(format) = &args.rename {
        let mode = if args.softlink {
            RenameMode::SoftLink
        } else if args.link {
            RenameMode::HardLink
        } else {
            RenameMode::Move
        };
        operations.push(Box::new(RenameOperation {
            target_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config: RenameConfig {
                format: format.clone(),
                mode,
                keep_structure: args.keep_structure,
                delete_empty: args.delete_empty,
                aired_date_format: args.date_format.clone(),
            },
        }));
    }

    let bar = ProgressBar::new(records.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut pipeline = Pipeline::new(operations);
    let mut ctx = OperationContext { cache: &mut cache, engine: &mut engine };
    let outcomes = pipeline.run(records, &mut ctx);

    let mut exit_code = 0;
    for outcome in &outcomes {
        bar.inc(1);
        if let Some(err) = &outcome.error {
            log::error!("{}: {err}", outcome.record.path.display());
            exit_code = 1;
            if args.abort {
                break;
            }
            continue;
        }
        if args.show_ed2k {
            if let Some(ed2k) = outcome.record.get("ed2k") {
                println!("{}: {ed2k}", outcome.record.path.display());
            }
        }
    }
    bar.finish_and_clear();

    engine.logout();
    exit_code
}

/// Hashes files without ever touching the network, for
/// `--suppress-network-activity` dry runs.
fn run_hash_only(records: Vec<Record>) -> i32 {
    let mut exit_code = 0;
    for record in records {
        match anidb_hash::hash_file(&record.path) {
            Ok(hash) => println!("{}: {}", record.path.display(), hash.ed2k),
            Err(e) => {
                log::error!("{}: {e}", record.path.display());
                exit_code = 1;
            }
        }
    }
    exit_code
}

fn default_field_names(args: &ApiArgs) -> Vec<&'static str> {
    let mut names = vec!["aid", "eid", "gid", "size", "ed2k", "filename"];
    if args.rename.is_some() {
        names.extend([
            "quality",
            "source",
            "resolution",
            "dub_language",
            "sub_language",
            "aired",
            "year",
            "romaji_name",
            "english_name",
            "episode_name",
            "episode_name_romaji",
        ]);
    }
    names
}
