//! Hosts command - list inventory hosts

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use super::CommandContext;

/// Arguments for the hosts command
#[derive(Parser, Debug, Clone)]
pub struct HostsArgs {
    /// Only hosts carrying this role
    #[arg(default_value = "all")]
    pub role: String,
}

#[derive(Debug, Serialize)]
struct HostRow {
    name: String,
    address: String,
    port: u16,
    roles: Vec<String>,
}

impl HostsArgs {
    /// Execute the hosts command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let inventory = ctx.load_inventory()?;
        let rows: Vec<HostRow> = inventory
            .hosts_by_role(&self.role)
            .iter()
            .map(|h| HostRow {
                name: h.name.clone(),
                address: h.address().to_string(),
                port: h.port,
                roles: h.roles.iter().cloned().collect(),
            })
            .collect();

        if ctx.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            for row in &rows {
                println!(
                    "{:<20} {:<16} {:<5} {}",
                    row.name,
                    row.address,
                    row.port,
                    row.roles.join(",")
                );
            }
            println!("{} host(s)", rows.len());
        }
        Ok(0)
    }
}
