use anyhow::Context;
use clap::Parser;

mod cli;
mod error;
mod event;
mod seccomp;
mod spawn;
mod tracer;

use tracer::Supervisor;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    if !cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        anyhow::bail!("detbox only supports Linux on x86_64");
    }

    let root = spawn::spawn_traced(&args.command).context("failed to spawn traced command")?;
    log::info!("tracing {} as pid {root}", args.command.join(" "));

    let mut supervisor = Supervisor::new(root, args.verbose);
    let exit_code = supervisor.run().context("supervision failed")?;

    std::process::exit(exit_code);
}
