//! Registry administration commands.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use svcdb::ServiceRegistry;
use svcmeta::CapabilityMatch;
use svcmeta::Descriptor;
use svcmeta::DescriptorRecord;
use svcmeta::Filter;
use svcmeta::Scope;
use svcmeta::ServiceMetadata;
use svcmeta::VersionMatch;
use tracing::info;
use tracing::warn;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "svcfw", version, about = "Inspect and edit the service registry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML configuration file
    #[arg(long, short, global = true, env = "SVCFW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Operate on the System scope instead of the User scope
    #[arg(long, global = true)]
    pub system: bool,

    /// Print descriptors as JSON records
    #[arg(long, global = true)]
    pub json: bool,

    /// Owner token recorded on add and checked on remove
    #[arg(long, global = true, env = "SVCFW_OWNER", default_value = "")]
    pub owner: String,

    /// Overrides `registry.user_path`
    #[arg(long, global = true, env = "SVCFW_USER_DB")]
    pub user_db: Option<PathBuf>,

    /// Overrides `registry.system_path`
    #[arg(long, global = true, env = "SVCFW_SYSTEM_DB")]
    pub system_db: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register every interface of a service description document
    Add { document: PathBuf },
    /// Remove a service and all of its interfaces
    Remove { service: String },
    /// List service names
    List {
        #[arg(long)]
        interface: Option<String>,
    },
    /// Find descriptors matching a filter
    Find {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        interface: Option<String>,
        /// `major.minor`; needs --interface
        #[arg(long, requires = "interface")]
        version: Option<String>,
        /// Match the version exactly instead of as a minimum
        #[arg(long)]
        exact: bool,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        /// Only descriptors whose capabilities are all in --capability
        #[arg(long)]
        loadable: bool,
        /// `key=value` custom attribute constraint
        #[arg(long = "attribute", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Show the default for an interface, or set it with --service
    Default {
        interface: String,
        #[arg(long)]
        service: Option<String>,
    },
    /// Show every implementation of an interface, marking the default
    Show { interface: String },
}

impl Command {
    pub fn mutates(&self) -> bool {
        match self {
            Command::Add { .. } | Command::Remove { .. } => true,
            Command::Default { service, .. } => service.is_some(),
            _ => false,
        }
    }
}

impl Cli {
    pub fn scope(&self) -> Scope {
        if self.system { Scope::System } else { Scope::User }
    }

    /// Applies command line overrides on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.user_db {
            config.registry.user_path = path.clone();
        }
        if let Some(path) = &self.system_db {
            config.registry.system_path = path.clone();
        }
        if self.system && self.command.mutates() {
            config.registry.system_read_only = false;
        }
    }
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err("attribute key is empty".into());
    }
    Ok((key.to_string(), value.to_string()))
}

/// Runs `cli.command` against `registry`, writing results to `out`.
pub fn execute(cli: &Cli, registry: &ServiceRegistry, out: &mut dyn Write) -> anyhow::Result<()> {
    let scope = cli.scope();

    match &cli.command {
        Command::Add { document } => {
            let bytes = std::fs::read(document).with_context(|| format!("reading {}", document.display()))?;
            let metadata = ServiceMetadata::parse_bytes(&bytes).with_context(|| format!("validating {}", document.display()))?;
            for warning in &metadata.warnings {
                warn!(document = %document.display(), "{warning}");
            }
            let descriptors = metadata.descriptors(scope);
            registry.register(&descriptors, &cli.owner)?;
            info!(service = %metadata.name, count = descriptors.len(), %scope, "registered");
            writeln!(out, "registered {} ({} interfaces)", metadata.name, descriptors.len())?;
        }
        Command::Remove { service } => {
            registry.unregister(service, scope, &cli.owner)?;
            writeln!(out, "removed {service}")?;
        }
        Command::List { interface } => {
            for name in registry.services(interface.as_deref(), scope)? {
                writeln!(out, "{name}")?;
            }
        }
        Command::Find { service, interface, version, exact, capabilities, loadable, attributes } => {
            let mut filter = Filter::new();
            if let Some(service) = service {
                filter = filter.service(service.clone());
            }
            if let Some(interface) = interface {
                let rule = if *exact { VersionMatch::Exact } else { VersionMatch::Minimum };
                filter = filter.interface_version(interface.clone(), version.as_deref().unwrap_or(""), rule);
            }
            let rule = if *loadable { CapabilityMatch::MatchLoadable } else { CapabilityMatch::MatchMinimum };
            filter = filter.capabilities(rule, capabilities.iter().cloned());
            for (key, value) in attributes {
                filter = filter.custom_attribute(key.clone(), value.clone());
            }
            print_descriptors(out, &registry.find(&filter, scope)?, None, cli.json)?;
        }
        Command::Default { interface, service: Some(service) } => {
            registry.set_default_by_name(service, interface, scope)?;
            writeln!(out, "default for {interface} is now {service}")?;
        }
        Command::Default { interface, service: None } => {
            let default = registry.interface_default(interface, scope)?;
            print_descriptors(out, std::slice::from_ref(&default), None, cli.json)?;
        }
        Command::Show { interface } => {
            let found = registry.find(&Filter::new().interface(interface.clone()), scope)?;
            if found.is_empty() {
                bail!("no implementation of {interface} in the {scope} scope");
            }
            let default = registry.interface_default(interface, scope).ok();
            print_descriptors(out, &found, default.as_ref(), cli.json)?;
        }
    }
    Ok(())
}

fn print_descriptors(out: &mut dyn Write, found: &[Descriptor], default: Option<&Descriptor>, json: bool) -> anyhow::Result<()> {
    if json {
        let records: Vec<DescriptorRecord> = found.iter().map(DescriptorRecord::from).collect();
        serde_json::to_writer_pretty(&mut *out, &records)?;
        writeln!(out)?;
        return Ok(());
    }

    for d in found {
        let marker = if default.is_some_and(|x| x == d && x.scope() == d.scope()) { "*" } else { " " };
        writeln!(
            out,
            "{marker} {} {} {} [{}] {}",
            d.service_name(),
            d.interface_name(),
            d.version(),
            d.service_type().as_tag(),
            d.location()
        )?;
    }
    Ok(())
}
