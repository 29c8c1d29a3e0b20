use {
    anyhow::Result,
    clap::Subcommand,
    courier_config::{CourierConfig, find_config_file, find_or_default_config_path, to_toml},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the resolved configuration (file, defaults and env overrides).
    Show,
    /// Print the config file path in use, or where one would be created.
    Path,
}

pub fn handle_config(action: ConfigAction, config: &CourierConfig) -> Result<()> {
    match action {
        ConfigAction::Show => show(config),
        ConfigAction::Path => {
            path();
            Ok(())
        },
    }
}

fn show(config: &CourierConfig) -> Result<()> {
    print!("{}", to_toml(&redacted(config))?);
    Ok(())
}

fn path() {
    match find_config_file() {
        Some(path) => println!("{}", path.display()),
        None => println!(
            "{} (not created, using defaults)",
            find_or_default_config_path().display()
        ),
    }
}

fn redacted(config: &CourierConfig) -> CourierConfig {
    let mut config = config.clone();
    if config.server.token.is_some() {
        config.server.token = Some("********".into());
    }
    config
}
