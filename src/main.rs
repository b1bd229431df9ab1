use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotnet_remote::config::{self, parse_deployment_entries, Profile};
use dotnet_remote::error::{AppError, SerializableError};
use dotnet_remote::keychain::{FixedPrompt, PassphrasePrompt, TerminalPrompt};
use dotnet_remote::logging::{strip_ansi, Transcript};
use dotnet_remote::output::{ConsoleOutput, ConsoleStatus, NullStatus, OutputSink, StatusSink};
use dotnet_remote::remote::{export_local_certificate, CertificateMode, RemoteOperations};
use dotnet_remote::ssh::{SessionOptions, SessionSettings, SettingsLayer};
use dotnet_remote::ui::UiThread;
use dotnet_remote::AppState;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PASSPHRASE_ENV: &str = "DOTNET_REMOTE_PASSPHRASE";

/// Deploy, provision and debug .NET applications on remote Linux devices
#[derive(Parser)]
#[command(name = "dotnet-remote", version, about)]
struct Cli {
    /// Launch profile (id or name) from profiles.toml
    #[arg(long, global = true)]
    profile: Option<String>,

    #[arg(long, global = true, env = "DOTNET_REMOTE_HOST")]
    host: Option<String>,

    #[arg(short = 'l', long, global = true)]
    user: Option<String>,

    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Private key file
    #[arg(short = 'i', long, global = true)]
    key: Option<PathBuf>,

    /// Connect to the IPv4 address of the host
    #[arg(short = '4', long, global = true)]
    ipv4: bool,

    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Machine-readable results and errors on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify that the device is reachable with the configured key
    Check,
    /// Install the .NET runtime or SDK on the device
    InstallDotnet {
        /// Download locally and upload instead of running the installer remotely
        #[arg(long)]
        offline: bool,
    },
    /// Install the remote debugger
    InstallDebugger {
        #[arg(long)]
        offline: bool,
    },
    /// Copy build output to the app folder
    Deploy {
        /// Local build output directory
        output: PathBuf,
        /// Empty the app folder first
        #[arg(long, conflicts_with = "no_clean")]
        clean: bool,
        #[arg(long)]
        no_clean: bool,
        /// Base directory for additional deployment entries
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },
    /// Empty (or create) a remote folder
    Clean { path: String },
    /// Change permissions of a remote path (`755` or `rwxr-xr-x`)
    Chmod { path: String, permissions: String },
    /// Install an HTTPS development certificate on the device
    Certs {
        /// PFX file to import; the local development certificate is exported otherwise
        #[arg(long)]
        pfx: Option<PathBuf>,
        #[arg(long, env = "DOTNET_REMOTE_CERT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Replace the certificate even if the device has a valid one
        #[arg(long)]
        always: bool,
    },
    /// Record the device's host key in ~/.ssh/known_hosts
    Fingerprint,
    /// Authorize the private key on the device using the account password
    AuthorizeKey {
        #[arg(long, env = "DOTNET_REMOTE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Generate a key pair if needed, register the host and authorize the key
    SetupKey {
        #[arg(long, env = "DOTNET_REMOTE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Print the environment of a running remote process
    Env { process: String },
    /// Run a command on the device
    Exec {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// List launch profiles
    Profiles,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dotnet_remote=info,warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e, json);
            ExitCode::FAILURE
        }
    }
}

fn report_error(error: &anyhow::Error, json: bool) {
    if !json {
        eprintln!("error: {:#}", error);
        return;
    }
    let serializable = match error.downcast_ref::<AppError>() {
        Some(app) => SerializableError::from(app),
        None => SerializableError {
            code: "UNKNOWN_ERROR".to_string(),
            message: format!("{:#}", error),
            details: None,
        },
    };
    match serde_json::to_string(&serializable) {
        Ok(text) => println!("{}", text),
        Err(_) => eprintln!("error: {:#}", error),
    }
}

/// Everything one invocation works with
struct Invocation {
    state: AppState,
    profile: Option<Profile>,
    settings: Arc<SessionSettings>,
    options: SessionOptions,
    output: Arc<dyn OutputSink>,
    status: Arc<dyn StatusSink>,
    json: bool,
}

impl Invocation {
    fn remote(&self) -> Result<RemoteOperations> {
        Ok(self.state.remote_operations(
            self.settings.clone(),
            self.options.clone(),
            self.profile.as_ref(),
            self.output.clone(),
            self.status.clone(),
        )?)
    }

    async fn password(&self, given: Option<String>) -> Result<String> {
        if let Some(password) = given {
            return Ok(password);
        }
        let prompt = format!("Password for {}: ", self.settings.display_target());
        let read = match self.state.ui() {
            Some(ui) => ui
                .invoke(move || rpassword::prompt_password(prompt))
                .await
                .ok_or_else(|| anyhow::anyhow!("Terminal thread is gone"))?,
            None => rpassword::prompt_password(prompt),
        };
        read.context("Failed to read password")
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_dir = match cli.config_dir.clone() {
        Some(dir) => dir,
        None => config::get_config_dir()?,
    };

    // The terminal owns the prompt; keep the thread alive until we return
    let (ui, _ui_guard) = UiThread::spawn("terminal").context("Failed to start terminal thread")?;
    let prompt: Arc<dyn PassphrasePrompt> = if std::env::var_os(PASSPHRASE_ENV).is_some() {
        Arc::new(FixedPrompt::from_env(PASSPHRASE_ENV))
    } else {
        Arc::new(TerminalPrompt)
    };
    let state = AppState::new(config_dir.clone())?.with_prompt(prompt, Some(ui));

    if matches!(cli.command, Command::Profiles) {
        return list_profiles(&state, cli.json);
    }

    let profile = cli
        .profile
        .as_deref()
        .map(|p| state.profile(p))
        .transpose()?;
    let explicit = SettingsLayer {
        host: cli.host.clone(),
        port: cli.port,
        username: cli.user.clone(),
        private_key_file: cli.key.clone(),
        force_ipv4: cli.ipv4.then_some(true),
    };
    let settings = state.session_settings(explicit, profile.as_ref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });
    let options = state.session_options(cancel);

    let console: Option<Arc<dyn OutputSink>> = if cli.json {
        None
    } else {
        Some(Arc::new(ConsoleOutput))
    };
    let output: Arc<dyn OutputSink> = match Transcript::new(
        config_dir.join("logs"),
        Some(settings.display_target()),
        console.clone(),
    ) {
        Ok(transcript) => transcript,
        Err(e) => {
            tracing::warn!("Transcript disabled: {}", e);
            console.unwrap_or_else(|| Arc::new(dotnet_remote::output::MemoryOutput::new()))
        }
    };
    let status: Arc<dyn StatusSink> = if cli.json {
        Arc::new(NullStatus)
    } else {
        Arc::new(ConsoleStatus)
    };

    let ctx = Invocation {
        state,
        profile,
        settings,
        options,
        output,
        status,
        json: cli.json,
    };
    execute(&ctx, cli.command).await
}

async fn execute(ctx: &Invocation, command: Command) -> Result<()> {
    match command {
        Command::Check => {
            ctx.remote()?.check_connection().await?;
            print_result(ctx, serde_json::json!({ "reachable": true }));
        }
        Command::InstallDotnet { offline } => {
            let remote = ctx.remote()?;
            remote.check_connection().await?;
            if offline {
                remote.install_dotnet_offline().await?;
            } else {
                remote.install_dotnet().await?;
            }
        }
        Command::InstallDebugger { offline } => {
            let remote = ctx.remote()?;
            remote.check_connection().await?;
            if offline {
                remote.install_debugger_offline().await?;
            } else {
                remote.install_debugger().await?;
            }
        }
        Command::Deploy {
            output,
            clean,
            no_clean,
            project_dir,
        } => {
            let settings = ctx.state.settings.read().clone();
            let clean = if clean || no_clean {
                clean
            } else {
                settings.deploy.clean_before_deploy
            };
            let entries = ctx
                .profile
                .as_ref()
                .and_then(|p| p.additional_entries.clone())
                .unwrap_or(settings.deploy.additional_entries);
            let entries = parse_deployment_entries(&entries)?;

            let remote = ctx.remote()?;
            remote.check_connection().await?;
            remote.deploy(&output, clean).await?;
            let project_dir = match project_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            remote.deploy_additional(&project_dir, &entries).await?;
        }
        Command::Clean { path } => {
            let remote = ctx.remote()?;
            remote.check_connection().await?;
            remote.clean_folder(&path).await?;
        }
        Command::Chmod { path, permissions } => {
            let remote = ctx.remote()?;
            remote.check_connection().await?;
            remote.change_permissions(&path, &permissions).await?;
        }
        Command::Certs { pfx, password, always } => {
            let mode = if always {
                CertificateMode::Always
            } else {
                ctx.state.settings.read().certificates.mode
            };
            let (bytes, password) = match pfx {
                Some(path) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    (bytes, password.unwrap_or_default())
                }
                None => {
                    let password = password.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                    (export_local_certificate(&password).await?, password)
                }
            };

            let remote = ctx.remote()?;
            remote.check_connection().await?;
            remote.setup_https_certificate(bytes, &password, mode).await?;
        }
        Command::Fingerprint => {
            let service = ctx
                .state
                .key_setup(ctx.settings.clone(), ctx.options.clone(), ctx.output.clone());
            let fingerprint = service.register_server_fingerprint().await?;
            print_result(ctx, serde_json::json!({ "fingerprint": fingerprint }));
        }
        Command::AuthorizeKey { password } => {
            let password = zeroize::Zeroizing::new(ctx.password(password).await?);
            ctx.state
                .key_setup(ctx.settings.clone(), ctx.options.clone(), ctx.output.clone())
                .authorize_key(&password)
                .await?;
        }
        Command::SetupKey { password } => {
            let password = zeroize::Zeroizing::new(ctx.password(password).await?);
            ctx.state
                .key_setup(ctx.settings.clone(), ctx.options.clone(), ctx.output.clone())
                .setup(&password)
                .await?;
        }
        Command::Env { process } => {
            let env = ctx.remote()?.remote_process_environment(&process).await?;
            if ctx.json {
                println!("{}", serde_json::to_string(&env)?);
            } else {
                let mut vars: Vec<_> = env.into_iter().collect();
                vars.sort();
                for (key, value) in vars {
                    println!("{}={}", key, value);
                }
            }
        }
        Command::Exec { command } => {
            let command = command.join(" ");
            let shell = ctx.state.secure_shell(ctx.settings.clone(), ctx.options.clone());
            let result = shell.try_execute_single_command(&command).await?;
            if ctx.json {
                println!("{}", serde_json::to_string(&result)?);
            } else {
                print!("{}", strip_ansi(&result.stdout));
                eprint!("{}", strip_ansi(&result.stderr));
            }
            if !result.success() {
                return Err(AppError::command_failed(&command, result.exit_code, &result.stderr).into());
            }
        }
        Command::Profiles => list_profiles(&ctx.state, ctx.json)?,
    }
    Ok(())
}

fn print_result(ctx: &Invocation, value: serde_json::Value) {
    if ctx.json {
        println!("{}", value);
    } else if let Some(fingerprint) = value.get("fingerprint").and_then(|v| v.as_str()) {
        println!("{}", fingerprint);
    }
}

fn list_profiles(state: &AppState, json: bool) -> Result<()> {
    let profiles = state.profiles.read().list();
    if json {
        println!("{}", serde_json::to_string(&profiles)?);
        return Ok(());
    }
    for profile in profiles {
        println!(
            "{}  {}  {}",
            profile.name,
            profile.host.as_deref().unwrap_or("-"),
            profile.id
        );
    }
    Ok(())
}
