use clap::Parser;
use miette::Result;
use tmt::cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Reset SIGPIPE so piping into `head` terminates quietly instead of panicking
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;
    init_tracing(global.verbose);

    match cli.command {
        Commands::Init(args) => tmt::cli::commands::init::run(args, &global),
        Commands::New(args) => tmt::cli::commands::new::run(args, &global),
        Commands::Budget(args) => tmt::cli::commands::budget::run(args, &global),
        Commands::Risk(args) => tmt::cli::commands::risk::run(args, &global),
        Commands::Gb(args) => tmt::cli::commands::gb::run(args, &global),
        Commands::Analyze(args) => tmt::cli::commands::analyze::run(args, &global),
        Commands::Convert(args) => tmt::cli::commands::convert::run(args, &global),
        Commands::Inst(cmd) => tmt::cli::commands::inst::run(cmd, &global),
        Commands::Completions(args) => tmt::cli::commands::completions::run(args),
    }
}

/// Log to stderr; RUST_LOG wins over --verbose
fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,tmt=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
