use clap::Parser;
use confkit::cli::commands::{convert, resolve};
use confkit::cli::{Cli, Commands, commands::show};
use confkit::{EngineSettings, logging};

fn load_settings(cli: &Cli) -> EngineSettings {
    let loaded = match &cli.config {
        Some(path) => EngineSettings::load_from(path),
        None => EngineSettings::load(),
    };
    match loaded {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: could not load settings: {e}");
            eprintln!("Using default settings.");
            EngineSettings::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let mut settings = load_settings(&cli);
    if cli.verbose {
        settings.logging.default = "debug".to_string();
    }
    logging::init_with_config(&settings.logging);

    let result = match &cli.command {
        Commands::Resolve {
            template,
            root,
            ext,
            format,
            placeholders,
        } => resolve::run(
            &resolve::ResolveArgs {
                template,
                root,
                ext: ext.as_deref(),
                format: format.as_deref(),
                placeholders,
            },
            &settings,
        ),
        Commands::Convert {
            input,
            output,
            force,
        } => convert::run(input, output, *force),
        Commands::Show { file, path } => show::run(file, path.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
