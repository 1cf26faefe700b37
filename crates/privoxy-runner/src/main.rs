use std::io::IsTerminal;
use std::process::ExitCode;

use privoxy_runner::config::ProcessEnv;
use privoxy_runner::paths::{self, InstallPaths};
use privoxy_runner::process::SystemRunner;
use privoxy_runner::wrapper::{self, RunContext, RunOutcome};
use privoxy_runner::{Error, Result};

// No flags of its own: every argument goes to the analyzer untouched.
fn main() -> ExitCode {
    privoxy_runner::init_tracing();
    let mirror = std::io::stdout().is_terminal();

    match run(mirror) {
        Ok(RunOutcome::Completed) | Ok(RunOutcome::Skipped) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("privoxy-run: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(mirror: bool) -> Result<RunOutcome> {
    let args = std::env::args_os()
        .skip(1)
        .map(|a| {
            a.into_string()
                .map_err(|raw| Error::msg(format!("argument is not valid UTF-8: {raw:?}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let env = ProcessEnv;
    let root = paths::install_root(&env, &paths::current_exe()?)?;
    let runner = SystemRunner;
    let ctx = RunContext {
        paths: InstallPaths::new(root),
        env: &env,
        runner: &runner,
        mirror,
    };
    wrapper::run(&ctx, args)
}
