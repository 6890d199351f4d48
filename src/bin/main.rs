use std::{
    error::Error,
    io::{ErrorKind, IsTerminal},
    path::PathBuf,
    process,
};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use demonizer::{
    cli::{Cli, Commands, WorkerArgs, parse_args},
    config::{Config, load_config},
    error::ConfigError,
    runtime::{self, RuntimeMode},
    spawn::WorkerInvocation,
    status::{StatusReport, state_dir_for},
    supervisor::{Supervisor, stop_running_supervisor},
    worker::{self, CommandWorker, DetachedHost, IdleWorker, WorkerContext},
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    runtime::init(if args.sys {
        RuntimeMode::System
    } else {
        RuntimeMode::User
    });

    match args.command {
        Commands::Start { config, demon } => {
            let config_path = resolve_config_path(&config)?;
            let config = load(&config_path)?;
            let state_dir = state_dir_for(&config);
            let program = std::env::current_exe()?;

            info!("Starting demon supervisor with config {:?}", config_path);
            let supervisor =
                Supervisor::new(&config, &program, state_dir, demon.as_deref())?;
            supervisor.run()?;
        }
        Commands::Stop { config } => {
            let state_dir = match load(&resolve_config_path(&config)?) {
                Ok(config) => state_dir_for(&config),
                Err(ConfigError::ReadError(err)) if err.kind() == ErrorKind::NotFound => {
                    runtime::state_dir()
                }
                Err(err) => return Err(err.into()),
            };

            match stop_running_supervisor(&state_dir)? {
                Some(pid) => info!("Asked supervisor {pid} to shut down"),
                None => warn!("No running demon supervisor found; nothing to stop"),
            }
        }
        Commands::Status {
            config,
            json,
            no_color,
        } => {
            let config = load(&resolve_config_path(&config)?)?;
            let report = StatusReport::collect(&config, &state_dir_for(&config))?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                let color = !no_color && std::io::stdout().is_terminal();
                print!("{}", report.render(color));
            }
        }
        Commands::Worker(worker_args) => run_worker(worker_args),
    }

    Ok(())
}

fn run_worker(args: WorkerArgs) -> ! {
    let invocation = WorkerInvocation::from(args);
    let context = WorkerContext::from(&invocation);
    let mut host = DetachedHost;

    let code = match invocation.command {
        Some(command) => worker::run(&context, &mut host, &mut CommandWorker::new(command)),
        None => worker::run(&context, &mut host, &mut IdleWorker::default()),
    };
    process::exit(code)
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load(config_path: &std::path::Path) -> Result<Config, ConfigError> {
    load_config(Some(config_path.to_string_lossy().as_ref()))
}

fn resolve_config_path(path: &str) -> Result<PathBuf, Box<dyn Error>> {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        return Ok(candidate);
    }

    let resolved = std::env::current_dir()?.join(&candidate);
    Ok(resolved.canonicalize().unwrap_or(resolved))
}
