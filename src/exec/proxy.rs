// src/exec/proxy.rs

//! Host proxy settings propagated into builds and containers.

use std::collections::{BTreeMap, BTreeSet};

const PROXY_VARIABLES: [&str; 3] = ["http_proxy", "https_proxy", "ftp_proxy"];
const NO_PROXY: &str = "no_proxy";

/// Proxy variables found on the host, keyed by their lowercase name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxyEnvironment {
    /// Each entry maps to the lowercase and uppercase values seen on the host.
    variables: BTreeMap<&'static str, (Option<String>, Option<String>)>,
}

impl ProxyEnvironment {
    pub fn from_host() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        let mut variables = BTreeMap::new();

        for name in PROXY_VARIABLES.into_iter().chain([NO_PROXY]) {
            let lower = vars.get(name).cloned();
            let upper = vars.get(&name.to_uppercase()).cloned();
            if lower.is_some() || upper.is_some() {
                variables.insert(name, (lower, upper));
            }
        }

        Self { variables }
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    fn has_proxy(&self) -> bool {
        PROXY_VARIABLES
            .iter()
            .any(|name| self.variables.contains_key(name))
    }

    /// Variables for an image build. `no_proxy` is passed through unchanged.
    pub fn for_build(&self) -> BTreeMap<String, String> {
        self.render(&BTreeSet::new())
    }

    /// Variables for a container. Other containers on the task network are
    /// added to `no_proxy` so traffic between them bypasses the proxy.
    pub fn for_container(&self, network_members: &BTreeSet<String>) -> BTreeMap<String, String> {
        self.render(network_members)
    }

    fn render(&self, extra_no_proxy: &BTreeSet<String>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        for (name, (lower, upper)) in &self.variables {
            if *name == NO_PROXY {
                continue;
            }
            insert_both_cases(&mut env, name, lower, upper);
        }

        let (lower, upper) = self
            .variables
            .get(NO_PROXY)
            .cloned()
            .unwrap_or((None, None));

        if extra_no_proxy.is_empty() || !self.has_proxy() {
            insert_both_cases(&mut env, NO_PROXY, &lower, &upper);
            return env;
        }

        let extras = extra_no_proxy
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let extend = |existing: Option<String>| match existing {
            Some(value) if !value.is_empty() => format!("{value},{extras}"),
            _ => extras.clone(),
        };
        env.insert(
            NO_PROXY.to_string(),
            extend(lower.clone().or_else(|| upper.clone())),
        );
        env.insert(NO_PROXY.to_uppercase(), extend(upper.or(lower)));
        env
    }
}

/// Set both spellings, each falling back to the other when only one exists.
fn insert_both_cases(
    env: &mut BTreeMap<String, String>,
    name: &str,
    lower: &Option<String>,
    upper: &Option<String>,
) {
    let (lower, upper) = match (lower, upper) {
        (Some(l), Some(u)) => (l.clone(), u.clone()),
        (Some(v), None) | (None, Some(v)) => (v.clone(), v.clone()),
        (None, None) => return,
    };
    env.insert(name.to_string(), lower);
    env.insert(name.to_uppercase(), upper);
}
