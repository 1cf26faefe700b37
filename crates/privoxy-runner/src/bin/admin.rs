use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use privoxy_runner::config::{self, EnvSource, ProcessEnv};
use privoxy_runner::paths::{self, InstallPaths};
use privoxy_runner::process::SystemRunner;
use privoxy_runner::schedule::{InstallState, InstallTarget, Installer};
use privoxy_runner::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "privoxy-admin", author, version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactively add (or replace) the crontab entry that runs privoxy-run
    InstallSchedule {
        /// Run wrapper the entry invokes (default: privoxy-run next to this binary)
        #[arg(long)]
        wrapper: Option<PathBuf>,
        /// Directory the entry changes into (default: the install root)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print the resolved settings (file + environment + defaults) as TOML
    Resolve {
        /// Settings file (default: <install root>/.env)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    privoxy_runner::init_tracing();
    let args = Args::parse();
    let res = match args.cmd {
        Command::InstallSchedule { wrapper, dir } => cmd_install_schedule(wrapper, dir),
        Command::Resolve { config } => cmd_resolve(config.as_deref()),
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("privoxy-admin: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn cmd_install_schedule(wrapper: Option<PathBuf>, dir: Option<PathBuf>) -> Result<()> {
    let env = ProcessEnv;
    let wrapper = match wrapper {
        Some(w) => absolute(&w)?,
        None => default_wrapper()?,
    };
    let dir = match dir {
        Some(d) => absolute(&d)?,
        None => paths::install_root(&env, &wrapper)?,
    };
    let home = env.var("HOME").map(PathBuf::from);
    let target = InstallTarget::new(dir, wrapper, home);
    target.validate()?;

    if !std::io::stdin().is_terminal() {
        tracing::warn!("stdin is not a terminal; reading answers from it anyway");
    }

    let runner = SystemRunner;
    let stdin = std::io::stdin();
    let mut installer = Installer::new(stdin.lock(), std::io::stdout(), target, &runner);
    match installer.run()? {
        InstallState::Installed { entry } => {
            tracing::info!("installed crontab entry: {entry}");
            Ok(())
        }
        InstallState::Aborted { reason } => Err(Error::msg(format!("aborted: {reason}"))),
        other => Err(Error::msg(format!("installer stopped in state {other:?}"))),
    }
}

fn cmd_resolve(config_file: Option<&Path>) -> Result<()> {
    let env = ProcessEnv;
    let file = match config_file {
        Some(p) => p.to_path_buf(),
        None => {
            let root = paths::install_root(&env, &default_wrapper()?)?;
            InstallPaths::new(root).config_file
        }
    };
    let settings = config::load(Some(&file), &env)?;
    println!("# resolved from {} + environment", file.display());
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}

fn default_wrapper() -> Result<PathBuf> {
    let me = paths::current_exe()?;
    Ok(me.with_file_name(paths::WRAPPER_BIN))
}

fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    Ok(cwd.join(p))
}
