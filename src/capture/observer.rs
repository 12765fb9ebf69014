//! Observer registration and lookup

use std::collections::HashMap;
use std::fmt;

use super::Flow;

/// Method key spelled `*` in configuration
pub const WILDCARD_METHOD: &str = "*";

/// Method part of a registration key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodMatch {
    /// Only this exact method (case-sensitive)
    Exact(String),
    /// Any method lacking an exact registration on the same route
    Any,
}

impl MethodMatch {
    pub fn parse(method: &str) -> Self {
        if method == WILDCARD_METHOD {
            MethodMatch::Any
        } else {
            MethodMatch::Exact(method.to_string())
        }
    }
}

impl From<&str> for MethodMatch {
    fn from(method: &str) -> Self {
        MethodMatch::parse(method)
    }
}

impl fmt::Display for MethodMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodMatch::Exact(method) => f.write_str(method),
            MethodMatch::Any => f.write_str(WILDCARD_METHOD),
        }
    }
}

/// Receives completed flows
pub trait FlowObserver: Send {
    fn on_flow(&mut self, flow: &Flow) -> anyhow::Result<()>;
}

impl<F> FlowObserver for F
where
    F: FnMut(&Flow) -> anyhow::Result<()> + Send,
{
    fn on_flow(&mut self, flow: &Flow) -> anyhow::Result<()> {
        self(flow)
    }
}

/// Route -> method -> observer
#[derive(Default)]
pub struct ObserverRegistry {
    routes: HashMap<String, HashMap<MethodMatch, Box<dyn FlowObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Returns true if it replaced an earlier one
    /// for the same route and method.
    pub fn register<O>(&mut self, route: &str, method: impl Into<MethodMatch>, observer: O) -> bool
    where
        O: FlowObserver + 'static,
    {
        self.routes
            .entry(route.to_string())
            .or_default()
            .insert(method.into(), Box::new(observer))
            .is_some()
    }

    /// Which registration a flow with this route/method would hit
    pub fn resolve(&self, route: &str, method: &str) -> Option<MethodMatch> {
        let methods = self.routes.get(route)?;
        let exact = MethodMatch::Exact(method.to_string());
        if methods.contains_key(&exact) {
            Some(exact)
        } else if methods.contains_key(&MethodMatch::Any) {
            Some(MethodMatch::Any)
        } else {
            None
        }
    }

    pub(crate) fn resolve_mut(
        &mut self,
        route: &str,
        method: &str,
    ) -> Option<(MethodMatch, &mut Box<dyn FlowObserver>)> {
        let key = self.resolve(route, method)?;
        let observer = self.routes.get_mut(route)?.get_mut(&key)?;
        Some((key, observer))
    }

    /// Number of (route, method) registrations
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered routes, sorted
    pub fn routes(&self) -> Vec<&str> {
        let mut routes: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("routes", &self.routes())
            .field("registrations", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Flow) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_method_match_parse() {
        assert_eq!(MethodMatch::parse("*"), MethodMatch::Any);
        assert_eq!(MethodMatch::parse("GET"), MethodMatch::Exact("GET".to_string()));
        assert_eq!(MethodMatch::Any.to_string(), "*");
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let mut registry = ObserverRegistry::new();
        registry.register("/device/bledevice_info", MethodMatch::Any, noop);
        registry.register("/device/bledevice_info", "POST", noop);

        assert_eq!(
            registry.resolve("/device/bledevice_info", "POST"),
            Some(MethodMatch::Exact("POST".to_string()))
        );
        assert_eq!(
            registry.resolve("/device/bledevice_info", "GET"),
            Some(MethodMatch::Any)
        );
    }

    #[test]
    fn test_no_match() {
        let mut registry = ObserverRegistry::new();
        registry.register("/user/get_bound_devices", "GET", noop);

        assert_eq!(registry.resolve("/user/get_bound_devices", "POST"), None);
        assert_eq!(registry.resolve("/user/get_bound_devices/", "GET"), None);
        assert_eq!(registry.resolve("/other", "GET"), None);
    }

    #[test]
    fn test_methods_are_case_sensitive() {
        let mut registry = ObserverRegistry::new();
        registry.register("/r", "GET", noop);
        assert_eq!(registry.resolve("/r", "get"), None);
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = ObserverRegistry::new();
        assert!(!registry.register("/r", "GET", noop));
        assert!(registry.register("/r", "GET", noop));
        assert!(!registry.register("/r", "*", noop));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.routes(), vec!["/r"]);
    }
}
