use toolgate_app::cli::{self, Command, USAGE};
use toolgate_app::commands::{self, run::RunOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match cli::parse(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("❌ {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    match invocation.command {
        Command::Help => println!("{}", USAGE),
        Command::Check { catalog } => {
            commands::check::run(&catalog)?;
        }
        Command::Schemas { catalog } => {
            commands::schemas::run(&catalog)?;
        }
        Command::Run {
            catalog,
            calls,
            user,
            permissions,
            audit_log,
        } => {
            let config = commands::load_engine_config(invocation.config.as_deref())?;
            let options = RunOptions {
                catalog,
                calls,
                user,
                permissions,
                audit_log,
            };
            commands::run::run(config, &options).await?;
        }
    }

    Ok(())
}
