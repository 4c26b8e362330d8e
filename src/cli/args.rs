use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vctui")]
#[command(version, about = "Terminal console for a vCenter inventory", long_about = None)]
pub struct Args {
    /// Config file (default: ~/.vctui/config.toml)
    #[arg(short, long, global = true, env = "VCTUI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Datacenter to open
    #[arg(short, long, global = true, env = "VCTUI_DATACENTER")]
    pub datacenter: Option<String>,

    /// Inventory file for the bundled control plane
    #[arg(short, long, global = true, env = "VCTUI_INVENTORY")]
    pub inventory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    /// True when the interactive console will own the terminal
    pub fn is_interactive(&self) -> bool {
        self.command.is_none()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the inventory tree
    List {
        /// Output VM summaries as JSON
        #[arg(long)]
        json: bool,

        /// Filter: substring of name/host/MAC, or /regex/ on the name
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Show version
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let args = Args::try_parse_from(["vctui", "list", "--json", "-f", "/web/", "-d", "dc2"])
            .unwrap();
        assert_eq!(args.datacenter.as_deref(), Some("dc2"));
        assert!(!args.is_interactive());
        match args.command {
            Some(Command::List { json, filter }) => {
                assert!(json);
                assert_eq!(filter.as_deref(), Some("/web/"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_no_subcommand_is_interactive() {
        let args = Args::try_parse_from(["vctui", "--inventory", "lab.toml"]).unwrap();
        assert!(args.is_interactive());
        assert_eq!(args.inventory, Some(PathBuf::from("lab.toml")));
    }
}
