//! Guestbridge command line
//!
//! Inspect what the relay would do with a Guest document: the policy it
//! synthesizes, the monitor it injects and whether a referrer may embed it.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use guestbridge::sandbox::embedding::{check_referrer, parse_patterns};
use guestbridge::sandbox::script::probe_monitor;
use guestbridge::sandbox::{ContentSecurityPolicy, CspDeclaration, TamperMonitor, prepare_document};
use guestbridge::{Config, NAME, Result, VERSION};

#[derive(Parser, Debug)]
#[command(name = "guestbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON config file; GUESTBRIDGE_* variables override it
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the Content-Security-Policy for a Guest resource
    Csp {
        #[command(flatten)]
        domains: Domains,

        /// Print as a <meta> tag
        #[arg(long)]
        meta: bool,
    },
    /// Print the tamper monitor installer
    MonitorScript {
        /// Install it in a headless script host and report rule counts
        #[arg(long)]
        verify: bool,
    },
    /// Print a Guest document as the relay would load it
    Prepare {
        file: PathBuf,

        #[command(flatten)]
        domains: Domains,

        /// Leave the tamper monitor out
        #[arg(long)]
        no_monitor: bool,
    },
    /// Check a referrer against the configured allow-list
    CheckReferrer { url: String },
}

#[derive(Args, Debug)]
struct Domains {
    /// Origin allowed for scripts, styles, images and fonts (repeatable)
    #[arg(long = "resource-domain")]
    resource: Vec<String>,

    /// Origin allowed for fetch, XHR and WebSockets (repeatable)
    #[arg(long = "connect-domain")]
    connect: Vec<String>,
}

impl Domains {
    fn policy(&self) -> ContentSecurityPolicy {
        let declaration = CspDeclaration {
            connect_domains: self.connect.clone(),
            resource_domains: self.resource.clone(),
        };
        ContentSecurityPolicy::for_guest(Some(&declaration))
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{}", err);
            eprintln!("{}: {}", NAME, err);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<ExitCode> {
    log::debug!("{} v{}", NAME, VERSION);

    match cli.command {
        Command::Csp { domains, meta } => {
            let policy = domains.policy();
            if meta {
                println!("{}", policy.to_meta_tag());
            } else {
                println!("{}", policy.to_policy_string());
            }
        }
        Command::MonitorScript { verify } => {
            let monitor = TamperMonitor::default();
            println!("{}", monitor.installer_script()?);
            if verify {
                let summary = probe_monitor(&monitor, "")?;
                eprintln!(
                    "{} of {} rules installed ({} need a browser)",
                    summary.installed,
                    monitor.rules().len(),
                    summary.failed
                );
            }
        }
        Command::Prepare {
            file,
            domains,
            no_monitor,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let html = std::fs::read_to_string(&file)?;
            let monitor = if config.relay.tamper_monitor && !no_monitor {
                Some(TamperMonitor::default().script_tag()?)
            } else {
                None
            };
            println!("{}", prepare_document(&html, &domains.policy(), monitor.as_deref()));
        }
        Command::CheckReferrer { url } => {
            let config = load_config(cli.config.as_ref())?;
            let patterns = parse_patterns(&config.relay.allowed_referrers)?;
            return match check_referrer(&url, &patterns) {
                Ok(()) => {
                    println!("allowed: {}", url);
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    println!("denied: {}", err);
                    Ok(ExitCode::FAILURE)
                }
            };
        }
    }
    Ok(ExitCode::SUCCESS)
}
