use braid::cli::{Cli, Commands, commands};
use braid::logging::init_logging;
use clap::Parser;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("Failed to initialize logging: {e}");
        // Continue without structured logging.
    }

    let result = match &cli.command {
        Commands::Init { prefix, force } => commands::init::execute(prefix, *force),
        Commands::Create(args) => commands::create::execute(args, cli.json),
        Commands::Update(args) => commands::update::execute(args, cli.json),
        Commands::Close(args) => commands::close::execute(args, cli.json),
        Commands::Delete(args) => commands::delete::execute(args, cli.json),
        Commands::List(args) => commands::list::execute(args, cli.json),
        Commands::Show { ids } => commands::show::execute(ids, cli.json),
        Commands::Sync(args) => commands::sync::execute(args, cli.json),
        Commands::Doctor => commands::doctor::execute(cli.json),
        Commands::Hook { command } => commands::hook::execute(command),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {suggestion}");
        }
        std::process::exit(e.exit_code());
    }
}
