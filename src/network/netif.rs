//! Network interface enumeration via `ifconfig -a -v -D`

use crate::error::{Error, Result};
use crate::sys;
use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_while1},
    character::complete::{space0, space1},
    combinator::rest,
    sequence::{preceded, terminated},
};
use serde::Serialize;

/// One interface from the listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetifInfo {
    pub name: String,
    pub description: String,
    /// Driver name with unit, e.g. `epair0`
    pub driver_name: String,
}

impl NetifInfo {
    pub fn new(name: impl Into<String>, driver_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            driver_name: driver_name.into(),
        }
    }

    /// Jail VNET virtual interface pairs use the epair driver
    pub fn is_epair(&self) -> bool {
        self.driver_name.starts_with("epair")
    }
}

/// List interfaces on the host, or inside the given jail's VNET
pub fn list_network_interfaces(jid: Option<i32>) -> Result<Vec<NetifInfo>> {
    let jid = jid.map(|j| j.to_string());
    let mut args: Vec<&str> = Vec::new();
    if let Some(jid) = &jid {
        args.extend(["-j", jid.as_str()]);
    }
    args.extend(["-a", "-v", "-D"]);

    let output = sys::run_tool("ifconfig", &args)?;
    parse_ifconfig(&output)
}

/// Destroy an interface inside a jail's VNET
///
/// Destroying either end of an epair destroys both.
pub fn destroy_interface(jid: i32, name: &str) -> Result<()> {
    let jid = jid.to_string();
    sys::run_tool("ifconfig", &["-j", &jid, name, "destroy"]).map(drop)
}

/// Parse verbose ifconfig output
///
/// Unindented lines open a new interface; indented detail lines belong to the
/// interface opened last.
pub fn parse_ifconfig(output: &str) -> Result<Vec<NetifInfo>> {
    let mut interfaces: Vec<NetifInfo> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            let (_, name) = interface_header(line)
                .map_err(|_| Error::InterfaceListParse(format!("Bad header: {}", line)))?;
            interfaces.push(NetifInfo::new(name, ""));
            continue;
        }

        let current = interfaces.last_mut().ok_or_else(|| {
            Error::InterfaceListParse(format!("Detail line before any interface: {}", line))
        })?;

        if let Ok((_, value)) = detail("description:").parse(line) {
            current.description = value.trim().to_string();
        } else if let Ok((_, value)) = detail("drivername:").parse(line) {
            current.driver_name = value.trim().to_string();
        }
    }

    Ok(interfaces)
}

fn interface_header(input: &str) -> IResult<&str, &str> {
    terminated(
        take_while1(|c: char| c != ':' && !c.is_whitespace()),
        preceded(tag(":"), space1),
    )
    .parse(input)
}

fn detail<'a>(
    key: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    preceded((space0, tag(key), space0), rest)
}
