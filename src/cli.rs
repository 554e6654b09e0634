use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "detbox")]
#[command(
    about = "Run a command under ptrace + seccomp with deterministic syscall results",
    version
)]
pub struct Args {
    /// Command to run in the deterministic sandbox
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,

    /// Increase verbosity (-v, -vv, -vvv; -vvv also observes every
    /// syscall return value)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trailing_command() {
        let args = Args::parse_from(["detbox", "-vv", "sh", "-c", "exit 0"]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.command, ["sh", "-c", "exit 0"]);
        assert_eq!(args.log_level(), log::LevelFilter::Debug);
    }
}
