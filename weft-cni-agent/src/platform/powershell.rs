use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::Deserialize;
use tracing::debug;

use crate::firewall::FirewallRule;
use crate::platform::{
    FirewallStore, HostNetwork, LocalNetwork, MacAddress, PlatformRoute, RouteTable, run_command,
};
use crate::{Error, Result};

const POWERSHELL: &str = "powershell.exe";

/// Host adapter backed by PowerShell cmdlets.
#[derive(Clone, Debug)]
pub struct PowerShell {
    program: String,
}

impl Default for PowerShell {
    fn default() -> Self {
        Self {
            program: POWERSHELL.into(),
        }
    }
}

impl PowerShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn invoke(&self, script: &str) -> Result<String> {
        debug!(script, "invoking powershell");
        run_command(
            &self.program,
            &["-NoLogo", "-NoProfile", "-NonInteractive", "-Command", script],
        )
        .await
    }
}

/// Single-quoted PowerShell string literal.
pub(crate) fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn json_array(pipeline: &str) -> String {
    format!("ConvertTo-Json -Compress -InputObject @({pipeline})")
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct NetRoute {
    interface_index: u32,
    destination_prefix: String,
    next_hop: String,
}

#[derive(Deserialize, Debug)]
struct HnsNetwork {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "NetworkAdapterName")]
    adapter_name: String,
    #[serde(rename = "SourceMac")]
    source_mac: String,
    #[serde(rename = "ManagementIP")]
    management_ip: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct NetIpAddress {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    prefix_length: u8,
}

/// `ConvertTo-Json` prints nothing at all for an empty pipeline on some hosts.
fn parse_json_array<T: for<'de> Deserialize<'de>>(output: &str) -> Result<Vec<T>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(output)?)
}

fn list_routes_script() -> String {
    json_array(
        "Get-NetRoute -ErrorAction Ignore | Select-Object InterfaceIndex,DestinationPrefix,NextHop",
    )
}

fn parse_routes(output: &str) -> Result<Vec<PlatformRoute>> {
    parse_json_array::<NetRoute>(output)?
        .into_iter()
        .map(|r| -> Result<PlatformRoute> {
            Ok(PlatformRoute {
                link_index: r.interface_index,
                destination: r.destination_prefix.parse::<IpNetwork>()?,
                gateway: r.next_hop.parse::<IpAddr>()?,
            })
        })
        .collect()
}

fn route_script(verb: &str, route: &PlatformRoute) -> String {
    let confirm = if verb == "Remove" { " -Confirm:$false" } else { "" };
    format!(
        "{verb}-NetRoute -InterfaceIndex {} -DestinationPrefix {} -NextHop {}{confirm}",
        route.link_index, route.destination, route.gateway
    )
}

fn rule_exists_script(name: &str) -> String {
    format!(
        "if (Get-NetFirewallRule -Name {} -ErrorAction Ignore) {{ 'true' }} else {{ 'false' }}",
        quote(name)
    )
}

fn local_network_script(name: &str) -> String {
    json_array(&format!(
        "Get-HnsNetwork | Where-Object {{ $_.Name -eq {} }} | Select-Object Name,NetworkAdapterName,SourceMac,ManagementIP",
        quote(name)
    ))
}

fn parse_local_network(name: &str, output: &str) -> Result<LocalNetwork> {
    let network = parse_json_array::<HnsNetwork>(output)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound {
            kind: "network",
            name: name.to_string(),
        })?;
    Ok(LocalNetwork {
        name: network.name,
        adapter_name: network.adapter_name,
        source_mac: network.source_mac.parse()?,
        management_ip: network.management_ip,
    })
}

fn parse_ipv4_address(output: &str) -> Result<Option<Ipv4Network>> {
    let Some(addr) = parse_json_array::<NetIpAddress>(output)?.into_iter().next() else {
        return Ok(None);
    };
    let ip: Ipv4Addr = addr.ip_address.parse()?;
    Ok(Some(Ipv4Network::new(ip, addr.prefix_length)?))
}

#[async_trait]
impl RouteTable for PowerShell {
    async fn list_routes(&self) -> Result<Vec<PlatformRoute>> {
        let output = self.invoke(&list_routes_script()).await?;
        parse_routes(&output)
    }

    async fn add_route(&self, route: &PlatformRoute) -> Result<()> {
        self.invoke(&route_script("New", route)).await?;
        Ok(())
    }

    async fn remove_route(&self, route: &PlatformRoute) -> Result<()> {
        self.invoke(&route_script("Remove", route)).await?;
        Ok(())
    }
}

#[async_trait]
impl FirewallStore for PowerShell {
    async fn rule_exists(&self, name: &str) -> Result<bool> {
        let output = self.invoke(&rule_exists_script(name)).await?;
        Ok(output.trim() == "true")
    }

    async fn add_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.invoke(&format!("New-NetFirewallRule {}", rule.command_string()))
            .await?;
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> Result<()> {
        self.invoke(&format!("Remove-NetFirewallRule -Name {}", quote(name)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HostNetwork for PowerShell {
    async fn local_network(&self, name: &str) -> Result<LocalNetwork> {
        let output = self.invoke(&local_network_script(name)).await?;
        parse_local_network(name, &output)
    }

    async fn link_index(&self, adapter: &str) -> Result<u32> {
        let output = self
            .invoke(&format!("(Get-NetAdapter -Name {}).ifIndex", quote(adapter)))
            .await?;
        output
            .trim()
            .parse()
            .map_err(|_| Error::NotFound {
                kind: "adapter",
                name: adapter.to_string(),
            })
    }

    async fn enable_adapter(&self, adapter: &str) -> Result<()> {
        self.invoke(&format!("Enable-NetAdapter -Name {}", quote(adapter)))
            .await?;
        Ok(())
    }

    async fn set_mac_address(&self, adapter: &str, mac: &MacAddress) -> Result<()> {
        self.invoke(&format!(
            "Set-NetAdapterAdvancedProperty -Name {} -RegistryKeyword NetworkAddress -RegistryValue '{}'",
            quote(adapter),
            mac.to_hex()
        ))
        .await?;
        Ok(())
    }

    async fn ipv4_address(&self, adapter: &str) -> Result<Option<Ipv4Network>> {
        let output = self
            .invoke(&json_array(&format!(
                "Get-NetIPAddress -InterfaceAlias {} -AddressFamily IPv4 -ErrorAction Ignore | Select-Object IPAddress,PrefixLength",
                quote(adapter)
            )))
            .await?;
        parse_ipv4_address(&output)
    }

    async fn remove_ipv4_addresses(&self, adapter: &str) -> Result<()> {
        self.invoke(&format!(
            "Get-NetIPAddress -InterfaceAlias {} -AddressFamily IPv4 -ErrorAction Ignore | Remove-NetIPAddress -Confirm:$false",
            quote(adapter)
        ))
        .await?;
        Ok(())
    }

    async fn add_ipv4_address(&self, adapter: &str, address: Ipv4Network) -> Result<()> {
        self.invoke(&format!(
            "New-NetIPAddress -InterfaceAlias {} -IPAddress {} -PrefixLength {}",
            quote(adapter),
            address.ip(),
            address.prefix()
        ))
        .await?;
        Ok(())
    }

    async fn enable_ip_forwarding(&self, adapter: &str) -> Result<()> {
        self.invoke(&format!(
            "Set-NetIPInterface -InterfaceAlias {} -Forwarding Enabled",
            quote(adapter)
        ))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("gw0"), "'gw0'");
        assert_eq!(quote("it's"), "'it''s'");
    }

    #[test]
    fn test_parse_routes() -> Result<()> {
        let output = r#"[{"InterfaceIndex":12,"DestinationPrefix":"10.0.2.0/24","NextHop":"10.0.2.1"},{"InterfaceIndex":1,"DestinationPrefix":"::1/128","NextHop":"::"}]"#;
        let routes = parse_routes(output)?;
        assert_eq!(
            routes,
            vec![
                PlatformRoute {
                    link_index: 12,
                    destination: "10.0.2.0/24".parse()?,
                    gateway: "10.0.2.1".parse()?,
                },
                PlatformRoute {
                    link_index: 1,
                    destination: "::1/128".parse()?,
                    gateway: "::".parse()?,
                },
            ]
        );
        assert!(parse_routes("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_route_script() -> Result<()> {
        let route = PlatformRoute {
            link_index: 12,
            destination: "10.0.2.0/24".parse()?,
            gateway: "10.0.2.1".parse()?,
        };
        assert_eq!(
            route_script("New", &route),
            "New-NetRoute -InterfaceIndex 12 -DestinationPrefix 10.0.2.0/24 -NextHop 10.0.2.1"
        );
        assert_eq!(
            route_script("Remove", &route),
            "Remove-NetRoute -InterfaceIndex 12 -DestinationPrefix 10.0.2.0/24 -NextHop 10.0.2.1 -Confirm:$false"
        );
        Ok(())
    }

    #[test]
    fn test_parse_local_network() -> Result<()> {
        let output = r#"[{"Name":"weft-hnsnetwork","NetworkAdapterName":"Ethernet0","SourceMac":"00-15-5D-0A-1B-2C","ManagementIP":"192.168.1.11/24"}]"#;
        let network = parse_local_network("weft-hnsnetwork", output)?;
        assert_eq!(network.adapter_name, "Ethernet0");
        assert_eq!(network.source_mac.to_hex(), "00155d0a1b2c");
        assert_eq!(network.management_ip, "192.168.1.11/24");

        assert!(matches!(
            parse_local_network("weft-hnsnetwork", "[]"),
            Err(Error::NotFound { kind: "network", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_parse_ipv4_address() -> Result<()> {
        let output = r#"[{"IPAddress":"192.168.1.11","PrefixLength":24}]"#;
        let addr = parse_ipv4_address(output)?.expect("address");
        assert_eq!(addr.to_string(), "192.168.1.11/24");
        assert_eq!(parse_ipv4_address("")?, None);
        Ok(())
    }

    #[test]
    fn test_rule_exists_script() {
        assert_eq!(
            rule_exists_script("accept packets to local pods"),
            "if (Get-NetFirewallRule -Name 'accept packets to local pods' -ErrorAction Ignore) { 'true' } else { 'false' }"
        );
    }
}
