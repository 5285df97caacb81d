use anyhow::Result;
use clap::Parser;
use gmail_notifier::app;
use gmail_notifier::cli::{self, Cli, Commands, LogFormat};
use gmail_notifier::config::Config;
use gmail_notifier::error::NotifierError;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Several dependencies pull in rustls, so the provider must be chosen explicitly.
    // aws-lc-rs everywhere except Windows, where ring avoids the NASM/CMake toolchain.
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command() {
        Commands::Run => {
            let config = load_config(&cli, true).await?;
            tracing::info!(
                "gmail-notifier starting, notifying user {}",
                config.discord.recipient_id
            );

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            tracing::info!("Interrupt received, shutting down");
                            cancel.cancel();
                        }
                        Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
                    }
                });
            }

            app::run(config, cancel).await?;
            Ok(())
        }

        Commands::Status => {
            let config = load_config(&cli, false).await?;
            let report = app::status(&config)?;
            cli::print_status(&report);
            Ok(())
        }

        Commands::ResetAuth { all } => {
            let config = load_config(&cli, false).await?;
            let removed = app::reset_auth(&config, *all)?;
            if removed.is_empty() {
                println!("Nothing to reset.");
            } else {
                println!("Removed: {}", removed.join(", "));
                println!("The next run will ask for authorization over Discord again.");
            }
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(NotifierError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - discord.token: bot token (or DISCORD_TOKEN)");
            println!("  - discord.recipient_id: user to notify (or DISCORD_TARGET_USER_ID)");
            println!("  - gmail.polling_interval_minutes: how often to check for mail");

            Ok(())
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default_directive = if cli.verbose {
        "gmail_notifier=debug,info"
    } else {
        "gmail_notifier=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load config.toml plus environment overrides; `--data-dir` wins over both
async fn load_config(cli: &Cli, validate: bool) -> Result<Config> {
    let mut config = Config::load(&cli.config).await?;
    config.apply_env_overrides()?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if validate {
        config.validate()?;
    }
    Ok(config)
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(err) = error.downcast_ref::<NotifierError>() {
        match err {
            NotifierError::ConfigError(_) => {
                eprintln!("\nHint: Check config.toml and the DISCORD_TOKEN and");
                eprintln!("      DISCORD_TARGET_USER_ID environment variables.");
                eprintln!("      Run: gmail-notifier init-config");
            }
            NotifierError::CredentialAcquisition(_) => {
                eprintln!("\nHint: The recipient must accept DMs from the bot and answer");
                eprintln!("      the prompts in time.");
                eprintln!("      Restart to ask again.");
            }
            NotifierError::AuthError(_) => {
                eprintln!("\nHint: The stored Gmail authorization may be revoked.");
                eprintln!("      Run: gmail-notifier reset-auth");
            }
            _ => {}
        }
    }
}
