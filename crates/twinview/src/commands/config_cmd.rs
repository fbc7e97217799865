//! Config subcommand handlers.

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile, SecretKind};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into `CliError`.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Optional free-text answer; an empty reply means "not set".
fn prompt_optional(prompt: &str, current: Option<&str>) -> Result<Option<String>, CliError> {
    let answer: String = Input::new()
        .with_prompt(prompt)
        .default(current.unwrap_or_default().to_owned())
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;
    let answer = answer.trim();
    Ok((!answer.is_empty()).then(|| answer.to_owned()))
}

/// Ask for a secret and where to keep it. Returns the plaintext value to
/// write into the profile, or `None` when it went to the keyring or was skipped.
fn prompt_secret(profile_name: &str, kind: SecretKind, label: &str) -> Result<Option<String>, CliError> {
    let secret = rpassword::prompt_password(format!("{label} (empty to skip): ")).map_err(prompt_err)?;
    if secret.is_empty() {
        return Ok(None);
    }

    let store_choices = &["Store in system keyring (recommended)", "Save to config file (plaintext)"];
    let selection = Select::new()
        .with_prompt(format!("Where to store the {label}?"))
        .items(store_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        config::store_secret(profile_name, kind, &secret)?;
        eprintln!("   ✓ {label} stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret))
    }
}

fn profile_not_found(cfg: &Config, name: String) -> CliError {
    let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    available.sort_unstable();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

fn redact(profile: &mut Profile) {
    for secret in [&mut profile.symmetric_key, &mut profile.access_token] {
        if secret.is_some() {
            *secret = Some(REDACTED.into());
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let mut cfg = config::load_config_or_default();
            eprintln!("twinview configuration wizard");
            eprintln!("   Config path: {}\n", config::config_path().display());

            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default(config::active_profile_name(global, &cfg))
                .interact_text()
                .map_err(prompt_err)?;

            let existing = cfg.profiles.get(&profile_name).cloned().unwrap_or_default();

            let app_id = prompt_optional("Application id (subdomain, empty for none)", existing.app_id.as_deref())?;
            let device_id = prompt_optional("Device id", existing.device_id.as_deref())?;
            let scope_id = prompt_optional(
                "DPS id scope (empty to fetch from the application)",
                existing.scope_id.as_deref(),
            )?;

            let symmetric_key = prompt_secret(&profile_name, SecretKind::SymmetricKey, "Device symmetric key")?;
            let access_token = if app_id.is_some() {
                prompt_secret(&profile_name, SecretKind::AccessToken, "Access token")?
            } else {
                None
            };

            let profile = Profile {
                app_id,
                device_id,
                scope_id,
                symmetric_key: symmetric_key.or(existing.symmetric_key.clone()),
                access_token: access_token.or(existing.access_token.clone()),
                ..existing
            };

            cfg.profiles.insert(profile_name.clone(), profile);
            if cfg.default_profile.is_none() {
                cfg.default_profile = Some(profile_name.clone());
            }

            let path = config::save_config(&cfg)?;

            eprintln!("\n✓ Configuration written to {}", path.display());
            eprintln!("  Profile: {profile_name}");
            eprintln!("\n  Test it: twinview --profile {profile_name} device get");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let mut cfg = config::load_config_or_default();
            cfg.profiles.values_mut().for_each(redact);
            output::emit(global.output, &cfg, global.quiet)
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.active_profile_name();
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: twinview config init");
            } else {
                let mut names: Vec<&String> = cfg.profiles.keys().collect();
                names.sort_unstable();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(&cfg, name));
            }

            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetKey / SetToken ───────────────────────────────────────
        ConfigCommand::SetKey => store(global, SecretKind::SymmetricKey, "Device symmetric key"),
        ConfigCommand::SetToken => store(global, SecretKind::AccessToken, "Access token"),
    }
}

fn store(global: &GlobalOpts, kind: SecretKind, label: &str) -> Result<(), CliError> {
    let cfg = config::load_config_or_default();
    let profile_name = config::active_profile_name(global, &cfg);
    if !cfg.profiles.contains_key(&profile_name) {
        return Err(profile_not_found(&cfg, profile_name));
    }

    let secret = rpassword::prompt_password(format!("{label}: ")).map_err(prompt_err)?;
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: "secret".into(),
            reason: "value cannot be empty".into(),
        });
    }

    config::store_secret(&profile_name, kind, &secret)?;
    eprintln!("✓ {label} stored in system keyring for profile '{profile_name}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_hides_only_present_secrets() {
        let mut profile = Profile {
            symmetric_key: Some("c2VjcmV0".into()),
            device_id: Some("dev1".into()),
            ..Profile::default()
        };

        redact(&mut profile);

        assert_eq!(profile.symmetric_key.as_deref(), Some(REDACTED));
        assert_eq!(profile.access_token, None);
        assert_eq!(profile.device_id.as_deref(), Some("dev1"));
    }
}
