use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::cli::{Args, Command};
use crate::config::ConfigFile;
use crate::error::{Error, Result};
use crate::inventory::{apply_filter, build_tree_with, root_label};
use crate::vc::{Client, LocalClient, VmSummary};

pub async fn run_cli(args: Args, config: ConfigFile) -> Result<()> {
    if let Some(Command::Version) = args.command {
        println!("vctui v{}", crate::VERSION);
        return Ok(());
    }

    let client = LocalClient::load(&inventory_path(&args, &config)?).await?;
    let datacenter = pick_datacenter(&args, &config, &client)?;

    match args.command {
        Some(Command::List { json, filter }) => {
            handle_list(&client, &datacenter, &config, json, filter.as_deref()).await
        }
        Some(Command::Version) => Ok(()),
        None => {
            let vms = match client.vm_inventory(&datacenter, false).await {
                Ok(vms) => Some(vms),
                Err(e) => {
                    tracing::error!("Initial inventory fetch failed: {}", e);
                    None
                }
            };
            crate::ui::run_session(vms, &datacenter, Arc::new(client), &config).await
        }
    }
}

fn inventory_path(args: &Args, config: &ConfigFile) -> Result<PathBuf> {
    match args.inventory.as_ref().or(config.inventory.as_ref()) {
        Some(p) => Ok(p.clone()),
        None => Ok(ConfigFile::dir()?.join("inventory.toml")),
    }
}

/// Flag, then config, then the first datacenter in the inventory
fn pick_datacenter(args: &Args, config: &ConfigFile, client: &LocalClient) -> Result<String> {
    if let Some(dc) = args.datacenter.as_ref().or(config.datacenter.as_ref()) {
        return Ok(dc.clone());
    }
    client
        .datacenters()
        .into_iter()
        .next()
        .ok_or_else(|| Error::DatacenterNotFound("inventory has no datacenters".to_string()))
}

#[derive(Serialize)]
struct ListOutput<'a> {
    datacenter: &'a str,
    filter: &'a str,
    vms: Vec<&'a VmSummary>,
}

async fn handle_list(
    client: &LocalClient,
    datacenter: &str,
    config: &ConfigFile,
    json: bool,
    filter: Option<&str>,
) -> Result<()> {
    let vms = client.vm_inventory(datacenter, false).await?;
    let filter = filter.unwrap_or("").trim();
    let matched = apply_filter(filter, &vms)?;

    if json {
        let out = ListOutput {
            datacenter,
            filter,
            vms: matched.iter().map(|v| v.summary()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut root = build_tree_with(&matched, &config.tree_options());
    root.set_text(root_label(&config.root_label, filter));
    print!("{}", root.outline());
    println!("\nTotal: {} of {} VMs in {}", matched.len(), vms.len(), datacenter);
    Ok(())
}
