use anyhow::Context;
use dialoguer::{Input, Password};
use secrecy::SecretString;
use ssh_harden::client_config::{self, AddOutcome, HostEntry};
use ssh_harden::config::{validate_alias, validate_key_name, validate_token};
use ssh_harden::guard;
use ssh_harden::keys::{KeyStatus, SshKeygen};
use ssh_harden::provision::KeyProvisioning;
use ssh_harden::ssh::SshConnector;
use ssh_harden::HardenConfig;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let defaults = HardenConfig::from_env().context("failed to load defaults")?;
    let (config, password) = prompt(defaults)?;
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    Ok(runtime.block_on(harden(&config, password)))
}

fn prompt(defaults: HardenConfig) -> anyhow::Result<(HardenConfig, SecretString)> {
    let alias: String = Input::new()
        .with_prompt("Host alias")
        .default(defaults.alias.clone())
        .validate_with(|value: &String| validate_alias(value))
        .interact_text()?;
    let host: String = Input::new()
        .with_prompt("Host address")
        .default(defaults.host.clone())
        .validate_with(|value: &String| validate_token(value))
        .interact_text()?;
    let port: u16 = Input::new()
        .with_prompt("Port")
        .default(defaults.port)
        .interact_text()?;
    let user: String = Input::new()
        .with_prompt("Username")
        .default(defaults.user.clone())
        .validate_with(|value: &String| validate_token(value))
        .interact_text()?;
    // Empty input is re-prompted.
    let password = Password::new().with_prompt("Password").interact()?;
    let key_name: String = Input::new()
        .with_prompt("Key name")
        .default(defaults.key_name.clone())
        .validate_with(|value: &String| validate_key_name(value))
        .interact_text()?;

    let config = HardenConfig {
        alias,
        host,
        port,
        user,
        key_name,
        ..defaults
    };
    Ok((config, SecretString::new(password.into())))
}

async fn harden(config: &HardenConfig, password: SecretString) -> ExitCode {
    let connector = SshConnector::new(config.connect_options());
    let keygen = SshKeygen::new(config.kdf_rounds);
    let target = config.target();

    println!("==> Provisioning key for {}", target);
    let mut provisioning = KeyProvisioning::new(&connector, &keygen, config, password.clone());
    let outcome = match provisioning.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            println!(
                "Key provisioning failed at '{}': {}",
                provisioning.state(),
                e
            );
            return ExitCode::FAILURE;
        }
    };
    if outcome.key_status == KeyStatus::Generated {
        println!("Generated {}", config.private_key_path().display());
    }
    if outcome.already_provisioned {
        println!("Key login to {} already works, remote host left unchanged", target);
    } else {
        println!("Key login to {} verified", target);
    }

    println!("==> Adding '{}' to {}", config.alias, config.client_config_path().display());
    let entry = HostEntry {
        alias: config.alias.clone(),
        host_name: config.host.clone(),
        user: config.user.clone(),
        identity_file: config.private_key_path(),
        port: config.port,
    };
    match client_config::add_entry(&config.client_config_path(), &entry) {
        Ok(AddOutcome::Added) => println!("Host '{}' added", config.alias),
        Ok(AddOutcome::AlreadyExists) => {
            println!("Host '{}' already exists, left unchanged", config.alias)
        }
        Err(e) => println!("Could not update local ssh config: {}", e),
    }

    if !guard::applies_to(&config.user) {
        println!("==> Password login left enabled for root");
        return ExitCode::SUCCESS;
    }

    println!("==> Disabling password login on {}", target);
    match guard::disable_password_auth(
        &connector,
        &outcome.verified,
        &password,
        &config.sshd_config(),
    )
    .await
    {
        Ok(()) => println!("Password login disabled, key login only"),
        Err(e) => println!(
            "Password login NOT disabled: {} (backup at {})",
            e,
            config.sshd_config().backup_path()
        ),
    }
    ExitCode::SUCCESS
}
