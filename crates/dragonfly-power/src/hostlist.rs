//! Host registry and hostlist expressions
//!
//! Hosts are named with compact hostlist expressions such as
//! `node[1-4,8],bmc-a`. Numeric ranges keep the zero padding of their
//! lower bound (`n[01-03]` is `n01,n02,n03`).

use std::collections::HashSet;
use std::path::Path;

use crate::error::{PowerError, Result};

/// Refuse expressions that would expand beyond this many hosts
pub const MAX_EXPANSION: usize = 65536;

/// Expand a hostlist expression into individual host names, in order
pub fn expand(expr: &str) -> Result<Vec<String>> {
    let illegal = || PowerError::IllegalHosts(expr.to_string());

    let mut hosts = Vec::new();
    for term in split_terms(expr).ok_or_else(illegal)? {
        let term = term.trim();
        if term.is_empty() {
            return Err(illegal());
        }

        match term.find('[') {
            None => {
                if term.contains(']') {
                    return Err(illegal());
                }
                hosts.push(term.to_string());
            }
            Some(open) => {
                let close = term[open..].find(']').map(|i| open + i).ok_or_else(illegal)?;
                let prefix = &term[..open];
                let ranges = &term[open + 1..close];
                let suffix = &term[close + 1..];
                if suffix.contains('[') || suffix.contains(']') || ranges.is_empty() {
                    return Err(illegal());
                }

                for range in ranges.split(',') {
                    let (lo, hi) = range.split_once('-').unwrap_or((range, range));
                    let width = lo.len();
                    let lo_n: u64 = lo.trim().parse().map_err(|_| illegal())?;
                    let hi_n: u64 = hi.trim().parse().map_err(|_| illegal())?;
                    if lo_n > hi_n || hi_n - lo_n >= MAX_EXPANSION as u64 {
                        return Err(illegal());
                    }
                    for n in lo_n..=hi_n {
                        hosts.push(format!("{}{:0width$}{}", prefix, n, suffix, width = width));
                    }
                    if hosts.len() > MAX_EXPANSION {
                        return Err(illegal());
                    }
                }
            }
        }
    }
    Ok(hosts)
}

/// Split on commas that are not inside brackets
fn split_terms(expr: &str) -> Option<Vec<&str>> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                terms.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    terms.push(&expr[start..]);
    Some(terms)
}

/// The set of hosts a session may address
///
/// Iteration follows insertion order; duplicates are ignored.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: Vec<String>,
    index: HashSet<String>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from a hostlist expression
    pub fn from_hostlist(expr: &str) -> Result<Self> {
        let mut registry = Self::new();
        registry.push_hostlist(expr)?;
        Ok(registry)
    }

    /// Parse the contents of a hosts file
    ///
    /// One hostlist expression per line. Blank lines and lines starting
    /// with `#` are skipped; trailing whitespace is ignored.
    pub fn from_hosts_file(contents: &str) -> Result<Self> {
        let mut registry = Self::new();
        for line in contents.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            registry.push_hostlist(line)?;
        }
        Ok(registry)
    }

    /// Read and parse a hosts file
    pub fn load_hosts_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| PowerError::HostsFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_hosts_file(&contents)
    }

    /// Add every host of a hostlist expression
    pub fn push_hostlist(&mut self, expr: &str) -> Result<()> {
        for host in expand(expr)? {
            self.push(host);
        }
        Ok(())
    }

    /// Add one host
    pub fn push(&mut self, host: impl Into<String>) {
        let host = host.into();
        if self.index.insert(host.clone()) {
            self.hosts.push(host);
        }
    }

    /// Check membership
    pub fn contains(&self, host: &str) -> bool {
        self.index.contains(host)
    }

    /// Number of hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// True when no host is registered
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Hosts in registry order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }

    /// Resolve a command's target hosts
    ///
    /// `None` means every registered host. A supplied expression must name
    /// registered hosts only; otherwise nothing is returned.
    pub fn resolve(&self, spec: Option<&str>) -> Result<Vec<String>> {
        let Some(spec) = spec else {
            return Ok(self.hosts.clone());
        };

        let hosts = expand(spec)?;
        if let Some(unknown) = hosts.iter().find(|h| !self.contains(h)) {
            return Err(PowerError::UnknownHost(unknown.clone()));
        }
        Ok(hosts)
    }
}
