//! Configuration view and validation commands: `taskforge config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use taskforge::taskforge_config::{CONFIG_DIR, CONFIG_FILE, TaskforgeConfig, TaskforgeToml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Taskforge Configuration");
            println!("=======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                TaskforgeToml::load(&config_path)?
            } else {
                println!("No taskforge.toml found at {}", config_path.display());
                println!("Using default configuration.");
                TaskforgeToml::default()
            };
            println!();

            let rendered =
                toml::to_string_pretty(&toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            let config = TaskforgeConfig::new(project_dir.to_path_buf())?;
            println!("  generator command = \"{}\"", config.toml.generator_cmd());
            println!("  max_parallel = {}", config.max_parallel());
            println!(
                "  review threshold = {} of {}",
                config.toml.effective_threshold(),
                config.toml.review.reviewers.len()
            );
            println!();

            if !config_path.exists() {
                println!("Run 'taskforge config init' to create a taskforge.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No taskforge.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = TaskforgeToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("taskforge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create {}", config_dir.display()))?;

            TaskforgeToml::default().save(&config_path)?;

            println!("Created taskforge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] name, context, tech_stack");
            println!("  - [generator] backend, command, args");
            println!("  - [[review.reviewers]] one entry per reviewer");
            println!();
        }
    }

    Ok(())
}
