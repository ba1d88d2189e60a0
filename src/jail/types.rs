//! Live jail snapshots parsed from `jls -n -q`

use crate::error::{Error, Result};
use crate::sys;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, space0, space1},
    combinator::{map, opt},
    multi::separated_list0,
    sequence::preceded,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A single live jail as reported by the kernel
///
/// Read-only snapshot; re-list jails when fresh parameter values are needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JailIdentity {
    pub jid: i32,
    pub name: String,
    /// Root directory of the jail
    pub path: PathBuf,
    /// Every other parameter `jls -n` printed
    pub params: BTreeMap<String, String>,
}

impl JailIdentity {
    pub fn new(jid: i32, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            jid,
            name: name.into(),
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// JID of the parent jail (0 for jails created on the host)
    pub fn parent(&self) -> Option<i32> {
        self.param("parent").and_then(|p| p.parse().ok())
    }

    /// Whether the jail owns its own network stack
    pub fn is_vnet(&self) -> bool {
        self.param("vnet") == Some("new")
    }

    /// Find a jail by name, or by JID when `key` is numeric
    pub fn find<'a>(jails: &'a [JailIdentity], key: &str) -> Option<&'a JailIdentity> {
        match key.parse::<i32>() {
            Ok(jid) => jails.iter().find(|j| j.jid == jid),
            Err(_) => jails.iter().find(|j| j.name == key),
        }
    }
}

/// List all live jails visible to this process
pub fn list_jails() -> Result<Vec<JailIdentity>> {
    let output = sys::run_tool("jls", &["-n", "-q"])?;
    parse_jls(&output)
}

/// Parse `jls -n -q` output, one jail per line
pub fn parse_jls(output: &str) -> Result<Vec<JailIdentity>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_jail_line)
        .collect()
}

fn parse_jail_line(line: &str) -> Result<JailIdentity> {
    let (rest, pairs) = params(line)
        .map_err(|e| Error::JailListParse(format!("{}: {}", line, e)))?;
    if !rest.trim().is_empty() {
        return Err(Error::JailListParse(format!(
            "Trailing input '{}' in: {}",
            rest, line
        )));
    }

    let mut params = BTreeMap::new();
    for (key, value) in pairs {
        let (key, value) = match value {
            Some(value) => (key.to_string(), value),
            None => boolean_param(key),
        };
        params.insert(key, value);
    }

    let jid = params
        .remove("jid")
        .and_then(|j| j.parse::<i32>().ok())
        .ok_or_else(|| Error::JailListParse(format!("Missing or invalid jid in: {}", line)))?;
    let name = params
        .remove("name")
        .ok_or_else(|| Error::JailListParse(format!("Missing name in: {}", line)))?;
    let path = params
        .remove("path")
        .ok_or_else(|| Error::JailListParse(format!("Missing path in: {}", line)))?;

    Ok(JailIdentity {
        jid,
        name,
        path: PathBuf::from(path),
        params,
    })
}

/// Bare words are booleans; a `no` prefix on the last component means false
///
/// `persist` -> ("persist", "true"), `allow.noset_hostname` -> ("allow.set_hostname", "false")
fn boolean_param(word: &str) -> (String, String) {
    let (prefix, last) = match word.rfind('.') {
        Some(dot) => word.split_at(dot + 1),
        None => ("", word),
    };
    match last.strip_prefix("no") {
        Some(stripped) if !stripped.is_empty() => {
            (format!("{}{}", prefix, stripped), "false".to_string())
        }
        _ => (word.to_string(), "true".to_string()),
    }
}

// Nom parsers for `key=value` listings

fn params(input: &str) -> IResult<&str, Vec<(&str, Option<String>)>> {
    preceded(space0, separated_list0(space1, param)).parse(input)
}

fn param(input: &str) -> IResult<&str, (&str, Option<String>)> {
    let (input, key) = take_while1(|c: char| !c.is_whitespace() && c != '=').parse(input)?;
    let (input, value) = opt(preceded(char('='), alt((quoted_value, bare_value)))).parse(input)?;
    Ok((input, (key, value)))
}

fn bare_value(input: &str) -> IResult<&str, String> {
    map(take_till(|c: char| c.is_whitespace()), String::from).parse(input)
}

/// Single- or double-quoted value with backslash escapes, as printed by `jls -q`
fn quoted_value(input: &str) -> IResult<&str, String> {
    let (body, quote) = alt((char('"'), char('\''))).parse(input)?;
    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((&body[i + c.len_utf8()..], value)),
            c => value.push(c),
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JLS: &str = "devfs_ruleset=4 nodying enforce_statfs=2 host=new ip4=disable jid=42 name=test1 osrelease=14.2-RELEASE parent=0 path=/jails/test1 persist vnet=new allow.noset_hostname host.hostname='test one'\n\
jid=43 name=test1.child parent=42 path=/jails/test1/child vnet=inherit\n";

    #[test]
    fn test_parse_jls() {
        let jails = parse_jls(JLS).unwrap();
        assert_eq!(jails.len(), 2);

        let jail = &jails[0];
        assert_eq!(jail.jid, 42);
        assert_eq!(jail.name, "test1");
        assert_eq!(jail.path, PathBuf::from("/jails/test1"));
        assert!(jail.is_vnet());
        assert_eq!(jail.parent(), Some(0));
        assert_eq!(jail.param("persist"), Some("true"));
        assert_eq!(jail.param("dying"), Some("false"));
        assert_eq!(jail.param("allow.set_hostname"), Some("false"));
        assert_eq!(jail.param("host.hostname"), Some("test one"));
        assert!(!jail.params.contains_key("jid"));

        assert_eq!(jails[1].parent(), Some(42));
        assert!(!jails[1].is_vnet());
    }

    #[test]
    fn test_parse_quoted_escapes() {
        let jails = parse_jls(r#"jid=1 name=q path=/j/q host.hostname="say \"hi\"" exec.start=''"#)
            .unwrap();
        assert_eq!(jails[0].param("host.hostname"), Some(r#"say "hi""#));
        assert_eq!(jails[0].param("exec.start"), Some(""));
    }

    #[test]
    fn test_parse_missing_jid() {
        assert!(matches!(
            parse_jls("name=broken path=/j/broken"),
            Err(Error::JailListParse(_))
        ));
    }

    #[test]
    fn test_parse_unterminated_quote() {
        assert!(parse_jls("jid=1 name=q path='/j/q").is_err());
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_jls("\n").unwrap().is_empty());
    }

    #[test]
    fn test_find_by_name_or_jid() {
        let jails = parse_jls(JLS).unwrap();
        assert_eq!(JailIdentity::find(&jails, "test1").map(|j| j.jid), Some(42));
        assert_eq!(
            JailIdentity::find(&jails, "43").map(|j| j.name.as_str()),
            Some("test1.child")
        );
        assert!(JailIdentity::find(&jails, "missing").is_none());
    }

    #[test]
    fn test_boolean_param() {
        assert_eq!(
            boolean_param("persist"),
            ("persist".to_string(), "true".to_string())
        );
        assert_eq!(
            boolean_param("nopersist"),
            ("persist".to_string(), "false".to_string())
        );
        assert_eq!(boolean_param("no"), ("no".to_string(), "true".to_string()));
    }
}
